//! Audio subsystem modules (decode, blur filtering, device output, and playback).

pub(crate) mod audio_decoder;
pub(crate) mod audio_output;
pub(crate) mod blur_chain;
pub(crate) mod filter;
pub(crate) mod format_adapter;
pub(crate) mod gain;
pub(crate) mod playback;
