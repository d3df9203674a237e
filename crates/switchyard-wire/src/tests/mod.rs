//! Codec tests exercising whole frames.

mod request_tests;
mod response_tests;
