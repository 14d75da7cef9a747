//! Integrity module - startup chain validation, repair, and genesis
//! reconciliation

mod checker;
mod genesis;

pub use checker::*;
pub use genesis::*;
