// Source scan guarding the logs: no `tracing::` call anywhere in the crate
// may name a field that carries letter content or patient identifiers.
