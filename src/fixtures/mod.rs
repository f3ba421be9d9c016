pub mod football_data;
pub mod provider;
pub mod reconcile;

pub use football_data::FootballData;
pub use provider::FixtureSource;
pub use reconcile::map_batch;
