//! Security features. Currently Cross-Origin Resource Sharing:
//! [`CorsFeature`] answers preflights and decorates responses.

mod cors;

pub use cors::CorsFeature;
