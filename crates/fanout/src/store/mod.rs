mod batch;
mod interface;
#[cfg(feature = "log-store")]
mod log;
mod memory;

pub use batch::*;
pub use interface::*;
#[cfg_attr(docsrs, doc(cfg(feature = "log-store")))]
#[cfg(feature = "log-store")]
pub use log::*;
pub use memory::*;
