use std::{fs::File, io::BufWriter, path::Path};

use anyhow::{ensure, Result};
use image::{codecs::hdr::HdrEncoder, Rgb};
use vulkan::{BufferHandle, MappedBuffer, ResourceAllocator};

/// Copies the mapped output out and releases the mapping. The host-read
/// barrier of the pass that wrote it must have completed.
pub fn read_image(mapped: MappedBuffer) -> Vec<f32> {
    let pixels = mapped.read::<f32>();
    mapped.unmap();
    pixels
}

pub fn read_output(allocator: &mut ResourceAllocator, handle: BufferHandle) -> Result<Vec<f32>> {
    Ok(read_image(allocator.map(handle)?))
}

pub fn to_rgb_pixels(data: &[f32]) -> Vec<Rgb<f32>> {
    data.chunks_exact(3)
        .map(|c| Rgb([c[0], c[1], c[2]]))
        .collect()
}

/// Writes row-major, channel-interleaved RGB floats as a Radiance HDR file.
pub fn write_hdr<P: AsRef<Path>>(path: P, width: u32, height: u32, data: &[f32]) -> Result<()> {
    let path = path.as_ref();
    let expected = width as usize * height as usize * 3;
    ensure!(
        data.len() == expected,
        "{} floats do not make a {width}x{height} RGB image",
        data.len()
    );

    let file = BufWriter::new(File::create(path)?);
    HdrEncoder::new(file).encode(&to_rgb_pixels(data), width as _, height as _)?;
    log::info!("Wrote {width}x{height} image to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::hdr::HdrDecoder;
    use std::io::BufReader;

    #[test]
    fn pixels_group_channels() {
        let pixels = to_rgb_pixels(&[0.0, 0.5, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pixels, vec![Rgb([0.0, 0.5, 1.0]), Rgb([2.0, 3.0, 4.0])]);
    }

    #[test]
    fn writes_radiance_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.hdr");
        let data = [0.5f32; 4 * 2 * 3];

        write_hdr(&path, 4, 2, &data).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"#?RADIANCE"));

        let decoder = HdrDecoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        let meta = decoder.metadata();
        assert_eq!((meta.width, meta.height), (4, 2));
        let pixels = decoder.read_image_hdr().unwrap();
        assert_eq!(pixels.len(), 8);
        assert!(pixels
            .iter()
            .all(|p| p.0.iter().all(|c| (c - 0.5).abs() < 0.01)));
    }

    #[test]
    fn wrong_pixel_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.hdr");

        assert!(write_hdr(&path, 4, 2, &[1.0; 7]).is_err());
        assert!(!path.exists());
    }
}
