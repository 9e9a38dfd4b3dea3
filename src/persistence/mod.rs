pub mod region_store;

pub use region_store::{RegionStore, StoreError, StoredRegion, WorldMetadata, unix_timestamp_now};
