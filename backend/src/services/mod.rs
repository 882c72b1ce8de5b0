pub mod email;
pub mod notifications;
pub mod pinballmap;
pub mod qr;
