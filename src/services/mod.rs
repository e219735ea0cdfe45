pub mod playback;
pub mod prefetch;
pub mod speech;
pub mod stroke;
