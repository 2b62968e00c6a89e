// Commerce services: cart, checkout and order read models
pub mod commerce;
