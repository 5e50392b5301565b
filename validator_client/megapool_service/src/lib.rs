pub mod admission;
pub mod bond;
pub mod clients;
pub mod config;
pub mod contract_service;
pub mod lifecycle;
pub mod proof_api;
pub mod proof_service;
pub mod queue;
pub mod state_reader;
pub mod status;
pub mod transaction;

pub use admission::{CanResponse, Execution, Verdict};
pub use lifecycle::MegapoolService;
