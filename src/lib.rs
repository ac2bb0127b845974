pub mod actions;
pub mod config;
pub mod crm;
pub mod executions;
pub mod inbound;
pub mod knowledge;
pub mod orchestration;
pub mod rules;
pub mod shared;
