//! End-to-end tests for the streamgate servers live under `tests/`.
