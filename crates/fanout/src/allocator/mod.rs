mod atomic;
mod interface;
#[cfg(test)]
mod tests;

pub use atomic::*;
pub use interface::*;
