pub mod flash;

pub use flash::EspFlashUpdater;
