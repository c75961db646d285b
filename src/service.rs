mod interface;
mod protocol;
mod server;

pub use interface::MonitorService;
pub use server::Server;
