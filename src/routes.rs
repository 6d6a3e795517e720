//! The routes for the Vitrine API

pub mod basic;
pub mod docs;
pub mod images;
