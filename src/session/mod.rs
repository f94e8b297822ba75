pub mod controller;
pub mod roster;
pub mod transcript;
pub mod view;

pub use controller::{Command, SessionController};
pub use roster::Roster;
pub use transcript::Transcript;
pub use view::ViewEvent;
