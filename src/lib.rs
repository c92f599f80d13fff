// THEORY:
// This file is the main entry point for the `chroma_lock` library crate. The crate
// watches a stream of YUV frames for an object of a chosen colour, locks onto it
// once it holds still, notices when it moves or disappears, and then composes a
// single before/after image of the event from the frames it kept.
//
// The public surface is small: `pipeline::VisionPipeline` takes
// frames, `config::PipelineConfig` describes the session, `messenger` carries
// changes in and notifications out, and `error::VisionError` reports the few
// conditions that are genuinely fatal. The per-frame algorithms live in
// `core_modules` and are public so they can be reused on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod messenger;
pub mod pipeline;
