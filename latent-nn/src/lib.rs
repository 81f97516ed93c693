pub mod candle_activations;
pub mod candle_aux_layers;
pub mod candle_decoder;
pub mod candle_decoder_count;
pub mod candle_encoder;
pub mod candle_encoder_variational;
pub mod candle_flow;
pub mod candle_loss_functions;
pub mod candle_model_traits;

pub use candle_core;
pub use candle_nn;
