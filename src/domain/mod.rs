// Domain layer - Plain data and the rules that belong to it
pub mod connection;
pub mod fleet;
pub mod machine;
pub mod telemetry;
