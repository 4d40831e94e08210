pub mod media_item;
pub mod thumbnail;

pub use media_item::*;
pub use thumbnail::*;
