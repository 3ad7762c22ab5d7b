pub mod bufferizer;
pub mod pcm;
pub mod stream_pipe;
pub mod xrun;
