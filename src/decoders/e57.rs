//! Best-effort ASTM E57 point extraction.
//!
//! E57 is a self-describing container: an XML section describes binary
//! sections that may use any bit-packed or compressed encoding. Decoding that
//! exhaustively is out of reach here, so this decoder guesses. It scans the
//! binary region between the file header and the XML section under three
//! record layouts and keeps the one that yields the most plausible points.
//!
//! The result is probabilistic. A file encoded differently than the three
//! layouts may produce a structurally wrong cloud or, when too few points look
//! plausible, an [`LoadError::InsufficientPoints`] error that tells the caller
//! to request a server-side conversion instead.

use std::borrow::Cow;

use futures::future::BoxFuture;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::asset::{AssetMetadata, DecodedAsset, PointLayout},
    decoders::{
        DecodeContext, DecodeInput, Decoder,
        bytes::{Endian, f32_at, f64_at, i32_at, u32_at, u64_at},
        point_cloud::{PointCloudBuilder, sample_stride},
    },
    error::LoadError,
    format::{AssetFormat, ConversionTarget},
    progress::ProgressReporter,
};

const FORMAT: AssetFormat = AssetFormat::PointCloudContainer;
const SIGNATURE: &[u8; 8] = b"ASTM-E57";
const HEADER_LEN: usize = 48;
/// Physical page size whose last four bytes hold a CRC.
const CRC_PAGE_SIZE: u64 = 1024;
const CRC_LEN: usize = 4;
const PLAUSIBLE_LIMIT: f64 = 1e9;
/// Records inspected before a hypothesis may be abandoned.
const PROBE_RECORDS: usize = 256;
const DEFAULT_INT_SCALE: f64 = 0.001;
const CHECKPOINT_INTERVAL: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct E57Header {
    pub version: (u32, u32),
    pub physical_length: u64,
    pub xml_offset: u64,
    pub xml_length: u64,
    pub page_size: u64,
}

impl E57Header {
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < SIGNATURE.len() {
            return Err(LoadError::truncated(FORMAT, SIGNATURE.len(), data.len()));
        }
        if &data[..8] != SIGNATURE {
            return Err(LoadError::MalformedSignature {
                format: FORMAT,
                expected: "ASTM-E57",
            });
        }
        if data.len() < HEADER_LEN {
            return Err(LoadError::truncated(FORMAT, HEADER_LEN, data.len()));
        }
        let le = Endian::Little;
        Ok(Self {
            version: (
                u32_at(data, 8, le).unwrap_or_default(),
                u32_at(data, 12, le).unwrap_or_default(),
            ),
            physical_length: u64_at(data, 16, le).unwrap_or_default(),
            xml_offset: u64_at(data, 24, le).unwrap_or_default(),
            xml_length: u64_at(data, 32, le).unwrap_or_default(),
            page_size: u64_at(data, 40, le).unwrap_or_default(),
        })
    }

    fn has_page_crcs(&self) -> bool {
        self.page_size == CRC_PAGE_SIZE
    }

    /// Maps a physical file offset to an offset into the CRC-free stream.
    fn logical_offset(&self, physical: u64) -> u64 {
        if !self.has_page_crcs() {
            return physical;
        }
        let payload = CRC_PAGE_SIZE - CRC_LEN as u64;
        (physical / CRC_PAGE_SIZE) * payload + (physical % CRC_PAGE_SIZE).min(payload)
    }
}

/// Drops the trailing CRC of every physical page.
fn strip_page_crcs(data: &[u8]) -> Vec<u8> {
    let page = CRC_PAGE_SIZE as usize;
    let mut out = Vec::with_capacity(data.len() / page * (page - CRC_LEN) + page);
    for chunk in data.chunks(page) {
        if chunk.len() == page {
            out.extend_from_slice(&chunk[..page - CRC_LEN]);
        } else {
            out.extend_from_slice(chunk);
        }
    }
    out
}

/// What the pattern search recovered from the XML section.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct XmlHints {
    pub record_count: Option<u64>,
    pub scale: [Option<f64>; 3],
    pub offset: [Option<f64>; 3],
}

impl XmlHints {
    /// Pattern search over the XML text; not a full XML parse.
    pub fn scan(xml: &str) -> Self {
        let mut hints = Self {
            record_count: attribute(xml, "recordCount").and_then(|v| v.parse().ok()),
            ..Default::default()
        };
        for (axis, element) in ["cartesianX", "cartesianY", "cartesianZ"].iter().enumerate() {
            let Some(tag) = element_tag(xml, element) else {
                continue;
            };
            hints.scale[axis] = attribute(tag, "scale").and_then(|v| v.parse().ok());
            hints.offset[axis] = attribute(tag, "offset").and_then(|v| v.parse().ok());
        }
        hints
    }
}

/// The opening tag `<name ...>` of the first element called `name`.
fn element_tag<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("<{name}");
    let mut from = 0;
    while let Some(found) = xml[from..].find(&needle) {
        let start = from + found;
        let rest = &xml[start + needle.len()..];
        // Skip longer names sharing the prefix
        if rest.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
            let end = rest.find('>').map_or(xml.len(), |e| start + needle.len() + e);
            return Some(&xml[start..end]);
        }
        from = start + needle.len();
    }
    None
}

/// Value of `name="..."` (or single quotes) anywhere in `text`.
fn attribute<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(found) = text[from..].find(name) {
        let start = from + found;
        from = start + name.len();
        let preceded_ok = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace());
        let rest = text[from..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|q| *q == '"' || *q == '\'') else {
            continue;
        };
        if !preceded_ok {
            continue;
        }
        let value = &rest[1..];
        return value.find(quote).map(|end| value[..end].trim());
    }
    None
}

fn plausible(p: [f64; 3]) -> bool {
    let valid = |v: f64| v.is_finite() && v.abs() < PLAUSIBLE_LIMIT && !v.is_subnormal();
    p.iter().all(|v| valid(*v)) && p.iter().any(|v| *v != 0.0)
}

/// One way of reading the binary region as coordinate triples.
struct Hypothesis {
    layout: PointLayout,
    stride: usize,
    scale: [f64; 3],
    offset: [f64; 3],
}

impl Hypothesis {
    fn all(hints: &XmlHints) -> [Hypothesis; 3] {
        let scale = [0, 1, 2].map(|i| hints.scale[i].filter(|s| *s != 0.0 && s.is_finite()).unwrap_or(DEFAULT_INT_SCALE));
        let offset = [0, 1, 2].map(|i| hints.offset[i].filter(|o| o.is_finite()).unwrap_or(0.0));
        [
            Hypothesis {
                layout: PointLayout::Float64Triples,
                stride: 24,
                scale: [1.0; 3],
                offset: [0.0; 3],
            },
            Hypothesis {
                layout: PointLayout::Float32Triples,
                stride: 12,
                scale: [1.0; 3],
                offset: [0.0; 3],
            },
            Hypothesis {
                layout: PointLayout::ScaledInt32Triples,
                stride: 12,
                scale,
                offset,
            },
        ]
    }

    fn records(&self, region: &[u8]) -> usize {
        region.len() / self.stride
    }

    /// The record at `index`, if it is a plausible point.
    fn point(&self, region: &[u8], index: usize) -> Option<[f64; 3]> {
        let base = index * self.stride;
        let le = Endian::Little;
        let p = match self.layout {
            PointLayout::Float64Triples => [
                f64_at(region, base, le)?,
                f64_at(region, base + 8, le)?,
                f64_at(region, base + 16, le)?,
            ],
            PointLayout::Float32Triples => {
                let raw = [
                    f32_at(region, base, le)?,
                    f32_at(region, base + 4, le)?,
                    f32_at(region, base + 8, le)?,
                ];
                if raw.iter().any(|v| v.is_subnormal()) {
                    return None;
                }
                raw.map(f64::from)
            }
            PointLayout::ScaledInt32Triples => [
                f64::from(i32_at(region, base, le)?) * self.scale[0] + self.offset[0],
                f64::from(i32_at(region, base + 4, le)?) * self.scale[1] + self.offset[1],
                f64::from(i32_at(region, base + 8, le)?) * self.scale[2] + self.offset[2],
            ],
        };
        plausible(p).then_some(p)
    }

    /// Counts plausible points, up to `cap`.
    ///
    /// Returns zero when more than half of the first records are implausible.
    fn score(&self, region: &[u8], cap: u64, cancel: &CancellationToken) -> Result<u64, LoadError> {
        let records = self.records(region);
        let probe = records.min(PROBE_RECORDS);
        let probe_valid = (0..probe).filter(|i| self.point(region, *i).is_some()).count();
        if probe_valid * 2 < probe {
            log::debug!("E57 layout {} abandoned after {probe} records", self.layout);
            return Ok(0);
        }
        let mut valid = probe_valid as u64;
        for index in probe..records {
            if valid >= cap {
                break;
            }
            if index % CHECKPOINT_INTERVAL == 0 {
                cancel.checkpoint()?;
            }
            if self.point(region, index).is_some() {
                valid += 1;
            }
        }
        Ok(valid.min(cap))
    }
}

pub struct E57Decoder;

impl Decoder for E57Decoder {
    fn format(&self) -> AssetFormat {
        FORMAT
    }

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>> {
        Box::pin(async move {
            decode_e57(&input.bytes, &input.name, ctx.config, ctx.progress, ctx.cancel)
        })
    }
}

pub fn decode_e57(
    data: &[u8],
    name: &str,
    config: &LoaderConfig,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<DecodedAsset, LoadError> {
    let header = E57Header::parse(data)?;
    log::info!(
        "Decoding E57 {name}: version {}.{}, page size {}, XML at {} ({} bytes)",
        header.version.0,
        header.version.1,
        header.page_size,
        header.xml_offset,
        header.xml_length
    );
    let logical: Cow<[u8]> = if header.has_page_crcs() {
        Cow::Owned(strip_page_crcs(data))
    } else {
        Cow::Borrowed(data)
    };

    let xml_start = header.logical_offset(header.xml_offset) as usize;
    let xml_valid = header.xml_offset as usize >= HEADER_LEN && xml_start < logical.len();
    let hints = if xml_valid {
        let xml_end = xml_start
            .saturating_add(header.xml_length as usize)
            .min(logical.len());
        XmlHints::scan(&String::from_utf8_lossy(&logical[xml_start..xml_end]))
    } else {
        XmlHints::default()
    };
    log::debug!("{name}: XML hints {hints:?}");

    let region_end = if xml_valid { xml_start } else { logical.len() };
    let region = logical.get(HEADER_LEN..region_end).unwrap_or(&[]);
    let cap = hints.record_count.filter(|c| *c > 0).unwrap_or(u64::MAX);
    progress.set_stage(0.0, 0.5);

    let hypotheses = Hypothesis::all(&hints);
    let mut best: Option<(&Hypothesis, u64)> = None;
    for (i, hypothesis) in hypotheses.iter().enumerate() {
        let score = hypothesis.score(region, cap, cancel)?;
        log::debug!("{name}: layout {} yields {score} plausible points", hypothesis.layout);
        // Ties keep the earlier layout
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((hypothesis, score));
        }
        progress.update(i as u64 + 1, hypotheses.len() as u64);
    }
    let (hypothesis, found) = best.unwrap_or((&hypotheses[0], 0));
    if found < config.min_container_points as u64 {
        log::warn!("{name}: only {found} plausible points, conversion required");
        return Err(LoadError::InsufficientPoints {
            found: found as usize,
            required: config.min_container_points,
            target: ConversionTarget::E57ToPly,
        });
    }

    progress.set_stage(0.5, 1.0);
    let stride = sample_stride(found, config.max_points);
    let mut builder = PointCloudBuilder::with_capacity(found.div_ceil(stride) as usize);
    let mut valid = 0u64;
    let records = hypothesis.records(region);
    for index in 0..records {
        if valid >= found {
            break;
        }
        if index % CHECKPOINT_INTERVAL == 0 {
            cancel.checkpoint()?;
            progress.update(index as u64, records as u64);
        }
        if let Some(point) = hypothesis.point(region, index) {
            if valid % stride == 0 {
                builder.push(point, None);
            }
            valid += 1;
        }
    }
    progress.complete_stage();
    log::info!(
        "{name}: chose layout {}, {} points kept (stride {stride})",
        hypothesis.layout,
        builder.len()
    );

    let metadata = AssetMetadata {
        layout: Some(hypothesis.layout),
        source_point_count: Some(hints.record_count.unwrap_or(found)),
        sample_stride: Some(stride),
        ..Default::default()
    };
    Ok(builder.build(name, FORMAT, config, metadata))
}
