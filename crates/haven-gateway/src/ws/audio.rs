//! Telephony audio conversion. The provider streams G.711 μ-law at 8 kHz;
//! the transcription upstream wants a WAV container with linear PCM.

use std::io::Cursor;

/// Expand μ-law bytes to 16-bit PCM and wrap them in a WAV container.
pub fn mulaw_to_wav(mulaw: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + mulaw.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &byte in mulaw {
            writer.write_sample(mulaw_decode(byte))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// G.711 μ-law expansion, one byte to one linear sample.
fn mulaw_decode(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let magnitude = ((((mantissa as i32) << 3) + 0x84) << exponent) - 0x84;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_decodes_to_zero() {
        assert_eq!(mulaw_decode(0xFF), 0);
        assert_eq!(mulaw_decode(0x7F), 0);
    }

    #[test]
    fn extremes_stay_within_i16() {
        // 0x00 is the largest negative magnitude, 0x80 the largest positive
        assert_eq!(mulaw_decode(0x80), 32124);
        assert_eq!(mulaw_decode(0x00), -32124);
    }

    #[test]
    fn sign_bit_flips_magnitude() {
        let positive = mulaw_decode(0x90);
        let negative = mulaw_decode(0x10);
        assert_eq!(positive, -negative);
    }

    #[test]
    fn wav_output_has_riff_header_and_sample_data() {
        let wav = mulaw_to_wav(&[0xFF; 160], 8000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus two bytes per sample
        assert_eq!(wav.len(), 44 + 160 * 2);
    }
}
