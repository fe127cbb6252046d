pub mod sse;

pub use sse::{encode_data_frame, is_done_event, sse_frame_stream, SseEvent, SseParser, DONE_FRAME};
