pub mod delegate;
pub mod descriptor;
pub mod device;
pub mod filter;
