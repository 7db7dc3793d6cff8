pub mod identity;
pub mod label_store;
pub mod people;
pub mod search;

pub use identity::PersonIdentityStore;
pub use label_store::{LabelStore, MemoryLabelStore, SledLabelStore, StoreError};
pub use people::{PeopleError, PeopleService};
pub use search::{PeopleQuery, PersonStats, SearchService, SortBy, SortOrder};
