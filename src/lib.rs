#![cfg_attr(not(test), no_std)]

pub mod app;
pub mod bsp;
pub mod clock;
pub mod context;
pub mod drivers;
pub mod events;
pub mod logger;
pub mod scheduler;
pub mod serialnumber;
pub mod shared;
pub mod systems;
pub mod util;

#[cfg(test)]
mod testing;

pub use app::App;
