pub(crate) mod relay_core;
