//! Primitives talking to one partition through one managed session

mod counter;
mod log;
mod map;
mod set;
mod value;

pub use counter::SessionCounter;
pub use log::SessionLog;
pub use map::SessionMap;
pub use set::SessionSet;
pub use value::SessionValue;
