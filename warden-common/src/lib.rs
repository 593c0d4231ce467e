#![cfg(not(doctest))]

#[macro_use]
extern crate diesel;

pub mod db;
pub mod email;
pub mod models;
pub mod otp;
pub mod request_io;
pub mod schema;
pub mod threadrand;
pub mod token;
pub mod trust;
pub mod validators;
