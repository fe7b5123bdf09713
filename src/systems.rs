pub mod alarm;
pub mod battery;
pub mod bus;
pub mod config;
pub mod history;
pub mod protocol;
pub mod sensor;
pub mod storage;
