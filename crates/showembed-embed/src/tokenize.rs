use anyhow::{Result, anyhow};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Tokenize a batch, padding every row to the longest sequence (capped at `max_len`).
///
/// Returns `(input_ids, attention_mask)`, both shaped `[B, T]`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let encodings = tokenizer.encode_batch(texts.to_vec(), true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let pad_id = tokenizer.token_to_id("[PAD]").unwrap_or(0);
    let seq_len = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(texts.len() * seq_len);
    let mut mask = Vec::with_capacity(texts.len() * seq_len);
    for enc in &encodings {
        let row_ids = &enc.get_ids()[..enc.get_ids().len().min(seq_len)];
        let row_mask = &enc.get_attention_mask()[..row_ids.len()];
        let pad = seq_len - row_ids.len();
        ids.extend_from_slice(row_ids); ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend_from_slice(row_mask); mask.extend(std::iter::repeat(0u32).take(pad));
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), seq_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), seq_len), device)?;
    Ok((input_ids, attention_mask))
}
