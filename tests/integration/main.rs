//! Integration tests: full cycles through the public API.

mod cycle;
mod mock_components;
