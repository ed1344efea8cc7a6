pub mod endpoint;
pub mod manager;
pub mod owner;
pub mod workload;

pub use endpoint::{render_service, service_port_with_defaults};
pub use manager::*;
pub use owner::{controller_owner_ref, set_controller_reference};
pub use workload::{env_var_with_defaults, render_deployment};
