pub mod appointment;
pub mod billing;
pub mod clinical;
pub mod enums;
pub mod inventory;
pub mod ward;

pub use appointment::*;
pub use billing::*;
pub use clinical::*;
pub use enums::*;
pub use inventory::*;
pub use ward::*;
