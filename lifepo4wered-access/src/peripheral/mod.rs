//! Peripheral drivers.

pub mod lifepo4wered;
