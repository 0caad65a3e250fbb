pub mod web_server;
pub mod wifi;

pub use web_server::{RailyardServer, SharedController, SharedRailway};
pub use wifi::AccessPoint;
