pub mod loc;
pub mod parallelism;
