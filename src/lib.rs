pub mod config;
pub mod demo_seeder;
pub mod error;
pub mod auth {
    pub mod gate;
    pub mod models;
    pub mod provider;
}
pub mod db {
    pub mod memory;
    pub mod models;
    #[cfg(feature = "mongo")]
    pub mod mongo;
    pub mod repository;
    pub mod store;
}
pub mod search {
    pub mod catalog;
    pub mod debounce;
    pub mod query;
}
pub mod mirror {
    pub mod cache;
    pub mod live;
}
pub mod forms {
    pub mod borrow;
    pub mod document;
}

pub use error::AppError;
