pub mod alerts;
pub mod delivery;
pub mod delivery_log;
pub mod owm;
pub mod report;
pub mod scheduler;
