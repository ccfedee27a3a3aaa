//! ASPRS LAS and LAZ survey point clouds.
//!
//! Records are read through the `las` crate, which applies the header's scale
//! and offset and decompresses LAZ. Huge files are sampled with a fixed stride
//! so at most `max_points` points are materialized.

use std::io::Cursor;

use futures::future::BoxFuture;
use las::Reader;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::asset::{AssetMetadata, DecodedAsset},
    decoders::{
        DecodeContext, DecodeInput, Decoder,
        bytes::{Endian, u16_at, u32_at},
        point_cloud::{PointCloudBuilder, sample_stride},
    },
    error::LoadError,
    format::AssetFormat,
    progress::ProgressReporter,
};

const FORMAT: AssetFormat = AssetFormat::PointCloudSurvey;
const SIGNATURE: &[u8; 4] = b"LASF";
/// Size of the LAS 1.0 - 1.2 public header block.
const MIN_HEADER_LEN: usize = 227;
/// Records between cancellation checks and progress updates.
const CHECKPOINT_INTERVAL: u64 = 64 * 1024;

/// Layout facts checked before the buffer is handed to the `las` reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RecordLayout {
    version: (u8, u8),
    point_format: u8,
    point_data_offset: usize,
    record_length: usize,
    compressed: bool,
}

impl RecordLayout {
    fn check(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < SIGNATURE.len() {
            return Err(LoadError::truncated(FORMAT, SIGNATURE.len(), data.len()));
        }
        if &data[..4] != SIGNATURE {
            return Err(LoadError::MalformedSignature {
                format: FORMAT,
                expected: "LASF",
            });
        }
        let truncated = || LoadError::truncated(FORMAT, MIN_HEADER_LEN, data.len());
        if data.len() < MIN_HEADER_LEN {
            return Err(truncated());
        }
        let le = Endian::Little;
        let point_data_offset = u32_at(data, 96, le).ok_or_else(truncated)? as usize;
        let record_length = usize::from(u16_at(data, 105, le).ok_or_else(truncated)?);
        // LAZ marks compressed records by setting one of the two high bits
        let compressed = data[104] & 0xC0 != 0;
        if point_data_offset > data.len() {
            return Err(LoadError::truncated(FORMAT, point_data_offset, data.len()));
        }
        Ok(Self {
            version: (data[24], data[25]),
            point_format: data[104] & 0x3F,
            point_data_offset,
            record_length,
            compressed,
        })
    }

    /// Whole records present after the header, unknown for compressed data.
    fn records_present(&self, len: usize) -> Option<u64> {
        if self.compressed || self.record_length == 0 {
            return None;
        }
        Some(((len - self.point_data_offset) / self.record_length) as u64)
    }
}

fn las_error(err: las::Error) -> LoadError {
    LoadError::decode(FORMAT, err.to_string())
}

pub struct LasDecoder;

impl Decoder for LasDecoder {
    fn format(&self) -> AssetFormat {
        FORMAT
    }

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>> {
        Box::pin(async move {
            decode_las(input.bytes, &input.name, ctx.config, ctx.progress, ctx.cancel)
        })
    }
}

pub fn decode_las(
    data: Vec<u8>,
    name: &str,
    config: &LoaderConfig,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<DecodedAsset, LoadError> {
    let layout = RecordLayout::check(&data)?;
    let present = layout.records_present(data.len());
    let mut reader = Reader::new(Cursor::new(data)).map_err(las_error)?;
    let announced = reader.header().number_of_points();
    let use_color = reader.header().point_format().has_color && config.use_embedded_point_color;
    log::info!(
        "Decoding {} {name}: version {}.{}, point format {}, {announced} points",
        if layout.compressed { "LAZ" } else { "LAS" },
        layout.version.0,
        layout.version.1,
        layout.point_format
    );

    let mut metadata = AssetMetadata::default();
    let count = match present {
        Some(present) if announced > present => {
            metadata.warn(format!(
                "{name}: header announces {announced} points but only {present} records are present"
            ));
            present
        }
        _ => announced,
    };
    if count == 0 {
        return Err(LoadError::decode(FORMAT, "file contains no point records"));
    }
    let stride = sample_stride(count, config.max_points);

    let capacity = count.div_ceil(stride) as usize;
    let mut points = Vec::with_capacity(capacity);
    let mut rgb = Vec::with_capacity(if use_color { capacity } else { 0 });
    let mut max_channel = 0u16;
    let mut index = 0u64;
    let mut visited = 0u64;
    while index < count {
        if visited % CHECKPOINT_INTERVAL == 0 {
            cancel.checkpoint()?;
            progress.update(index, count);
        }
        if stride > 1 {
            reader.seek(index).map_err(las_error)?;
        }
        let point = match reader.points().next() {
            Some(point) => point.map_err(las_error)?,
            None => break,
        };
        points.push([point.x, point.y, point.z]);
        if use_color {
            let color = point
                .color
                .map_or([0; 3], |c| [c.red, c.green, c.blue]);
            max_channel = max_channel.max(color[0]).max(color[1]).max(color[2]);
            rgb.push(color);
        }
        index += stride;
        visited += 1;
    }
    progress.complete_stage();

    // Writers disagree on 8 or 16 bit color; all-zero means no color was recorded
    let divisor = if max_channel > 255 { 65535.0 } else { 255.0 };
    let has_color = rgb.len() == points.len() && max_channel > 0;
    let mut builder = PointCloudBuilder::with_capacity(points.len());
    for (i, point) in points.into_iter().enumerate() {
        let color = has_color.then(|| {
            let c = rgb[i];
            [
                f32::from(c[0]) / divisor,
                f32::from(c[1]) / divisor,
                f32::from(c[2]) / divisor,
            ]
        });
        builder.push(point, color);
    }
    metadata.source_point_count = Some(announced);
    metadata.sample_stride = Some(stride);
    Ok(builder.build(name, FORMAT, config, metadata))
}
