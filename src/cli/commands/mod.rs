pub mod generate;
pub mod init;
pub mod regenerate;
pub mod status;
