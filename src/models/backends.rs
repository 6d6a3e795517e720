//! The backend logic for Vitrine models

pub mod db;
mod images;
