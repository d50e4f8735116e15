//! Local SDP offers and answers

pub mod offer_answer;

pub use offer_answer::{build_local_sdp, default_audio_section, default_video_section, SectionBuilder};
