//! CKAN dumper client - reqwest implementation of the CKAN action API used by
//! the dumper.

pub mod ckan;

pub use ckan::{CkanClient, RequestBody};
