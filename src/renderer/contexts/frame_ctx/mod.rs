pub mod deletion;
pub mod frame;

// Responsibilities:
// - Describe the frame currently being recorded (FrameContext)
// - Replicate per-frame mutable state across frames in flight (FrameRing)
// - Defer destruction until a ring slot is known to be retired (DeletionTasks)
