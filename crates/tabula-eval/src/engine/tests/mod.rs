mod common;
mod pending;
mod periodic;
mod propagation;
mod structure;
