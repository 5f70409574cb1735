pub mod barrier;
pub mod draw;
pub mod render_pass;

// Responsibilities:
// - Compile render passes with one pipeline per subpass and their framebuffers
// - Walk subpasses in order while recording and bind per-draw state
// - Track image states and emit the barriers callers ask for
