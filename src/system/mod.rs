pub mod clock;
pub mod reset;
pub mod storage;

pub use clock::EspClock;
pub use storage::LittleFsVolume;
