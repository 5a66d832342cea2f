pub mod logger;
pub mod qr_image;
