mod connect_params;
mod connect_params_builder;

pub use connect_params::{ConnectParams, IntoConnectParams};
pub use connect_params_builder::ConnectParamsBuilder;
