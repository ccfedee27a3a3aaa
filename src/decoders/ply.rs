//! Stanford PLY, as points or as an indexed surface.

use futures::future::BoxFuture;

use crate::{
    cancellation::CancellationToken,
    config::LoaderConfig,
    data_structures::{
        asset::{AssetKind, AssetMetadata, DecodedAsset},
        geometry::Geometry,
        material::Material,
        scene_graph::{ContainerNode, MeshNode, PointsNode, SceneNode},
    },
    decoders::{
        DecodeContext, DecodeInput, Decoder,
        bytes::{Endian, ByteReader},
    },
    error::LoadError,
    format::AssetFormat,
    progress::ProgressReporter,
};

const FORMAT: AssetFormat = AssetFormat::PointCloudGeneric;
const END_HEADER: &[u8] = b"end_header";
const CHECKPOINT_INTERVAL: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Self::I8,
            "uchar" | "uint8" => Self::U8,
            "short" | "int16" => Self::I16,
            "ushort" | "uint16" => Self::U16,
            "int" | "int32" => Self::I32,
            "uint" | "uint32" => Self::U32,
            "float" | "float32" => Self::F32,
            "double" | "float64" => Self::F64,
            _ => return None,
        })
    }

    fn size(&self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Divisor that maps a color channel of this type into `0..=1`.
    fn color_range(&self) -> f64 {
        match self {
            Self::U8 | Self::I8 => 255.0,
            Self::U16 | Self::I16 => 65535.0,
            _ => 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub count: usize,
    pub properties: Vec<Property>,
}

impl Element {
    fn index_of(&self, names: &[&str]) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| names.contains(&p.name.as_str()))
    }

    /// Fewest body bytes one record can occupy.
    fn min_record_len(&self, encoding: Encoding) -> usize {
        let len = match encoding {
            // one character per value
            Encoding::Ascii => self.properties.len(),
            Encoding::BinaryLittleEndian | Encoding::BinaryBigEndian => self
                .properties
                .iter()
                .map(|p| match &p.kind {
                    PropertyKind::Scalar(ty) => ty.size(),
                    PropertyKind::List { count, .. } => count.size(),
                })
                .sum(),
        };
        len.max(1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlyHeader {
    pub encoding: Encoding,
    pub elements: Vec<Element>,
    /// Offset of the first body byte.
    pub body_offset: usize,
}

impl PlyHeader {
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        if !data.starts_with(b"ply") {
            return Err(LoadError::MalformedSignature {
                format: FORMAT,
                expected: "ply",
            });
        }
        let end = data
            .windows(END_HEADER.len())
            .position(|w| w == END_HEADER)
            .ok_or_else(|| LoadError::decode(FORMAT, "header is not terminated by end_header"))?;
        let body_offset = data[end..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(data.len(), |nl| end + nl + 1);

        let text = String::from_utf8_lossy(&data[..end]);
        let mut encoding = None;
        let mut elements: Vec<Element> = Vec::new();
        for line in text.lines().skip(1) {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("format") => {
                    encoding = Some(match tokens.next() {
                        Some("ascii") => Encoding::Ascii,
                        Some("binary_little_endian") => Encoding::BinaryLittleEndian,
                        Some("binary_big_endian") => Encoding::BinaryBigEndian,
                        other => {
                            return Err(LoadError::decode(
                                FORMAT,
                                format!("unknown encoding {}", other.unwrap_or("<none>")),
                            ));
                        }
                    })
                }
                Some("element") => {
                    let (Some(name), Some(count)) = (tokens.next(), tokens.next()) else {
                        return Err(LoadError::decode(FORMAT, format!("bad element line: {line}")));
                    };
                    let count = count
                        .parse()
                        .map_err(|_| LoadError::decode(FORMAT, format!("bad element count: {line}")))?;
                    elements.push(Element {
                        name: name.to_string(),
                        count,
                        properties: Vec::new(),
                    });
                }
                Some("property") => {
                    let tokens: Vec<&str> = tokens.collect();
                    let bad = || LoadError::decode(FORMAT, format!("bad property line: {line}"));
                    let property = match tokens.as_slice() {
                        ["list", count, item, name] => Property {
                            name: name.to_string(),
                            kind: PropertyKind::List {
                                count: ScalarType::parse(count).ok_or_else(bad)?,
                                item: ScalarType::parse(item).ok_or_else(bad)?,
                            },
                        },
                        [ty, name] => Property {
                            name: name.to_string(),
                            kind: PropertyKind::Scalar(ScalarType::parse(ty).ok_or_else(bad)?),
                        },
                        _ => return Err(bad()),
                    };
                    elements.last_mut().ok_or_else(bad)?.properties.push(property);
                }
                _ => {}
            }
        }
        let encoding = encoding.ok_or_else(|| LoadError::decode(FORMAT, "missing format line"))?;
        Ok(Self {
            encoding,
            elements,
            body_offset,
        })
    }

    /// Number of records over all elements, once the body is known to be able to hold them.
    pub fn record_total(&self, body_len: usize) -> Result<usize, LoadError> {
        let mut records = 0usize;
        let mut needed = 0usize;
        for element in &self.elements {
            let impossible = || {
                LoadError::decode(
                    FORMAT,
                    format!("element {} announces an impossible count {}", element.name, element.count),
                )
            };
            records = records.checked_add(element.count).ok_or_else(impossible)?;
            let bytes = element
                .count
                .checked_mul(element.min_record_len(self.encoding))
                .ok_or_else(impossible)?;
            needed = needed.checked_add(bytes).ok_or_else(impossible)?;
        }
        if needed > body_len {
            return Err(LoadError::truncated(FORMAT, needed, body_len));
        }
        Ok(records)
    }
}

/// Reads scalar values from either body encoding.
enum BodyReader<'a> {
    Ascii(std::str::SplitAsciiWhitespace<'a>),
    Binary(ByteReader<'a>),
}

impl BodyReader<'_> {
    fn read(&mut self, ty: ScalarType) -> Result<f64, LoadError> {
        match self {
            BodyReader::Ascii(tokens) => {
                let token = tokens
                    .next()
                    .ok_or_else(|| LoadError::decode(FORMAT, "body ended before all elements were read"))?;
                token
                    .parse::<f64>()
                    .map_err(|_| LoadError::decode(FORMAT, format!("not a number: {token}")))
            }
            BodyReader::Binary(reader) => Ok(match ty {
                ScalarType::I8 => f64::from(reader.read_i8()?),
                ScalarType::U8 => f64::from(reader.read_u8()?),
                ScalarType::I16 => f64::from(reader.read_i16()?),
                ScalarType::U16 => f64::from(reader.read_u16()?),
                ScalarType::I32 => f64::from(reader.read_i32()?),
                ScalarType::U32 => f64::from(reader.read_u32()?),
                ScalarType::F32 => f64::from(reader.read_f32()?),
                ScalarType::F64 => reader.read_f64()?,
            }),
        }
    }

    fn read_list(&mut self, count: ScalarType, item: ScalarType, out: &mut Vec<f64>) -> Result<(), LoadError> {
        out.clear();
        let len = self.read(count)?;
        if !(0.0..=1_000_000.0).contains(&len) {
            return Err(LoadError::decode(FORMAT, format!("implausible list length {len}")));
        }
        for _ in 0..len as usize {
            out.push(self.read(item)?);
        }
        Ok(())
    }
}

/// Property slots of the vertex element.
struct VertexLayout {
    position: [usize; 3],
    normal: Option<[usize; 3]>,
    color: Option<([usize; 3], f64)>,
}

impl VertexLayout {
    fn of(element: &Element) -> Result<Self, LoadError> {
        let index = |names: &[&str]| element.index_of(names);
        let (Some(x), Some(y), Some(z)) = (index(&["x"]), index(&["y"]), index(&["z"])) else {
            return Err(LoadError::decode(FORMAT, "vertex element lacks x/y/z"));
        };
        let normal = match (index(&["nx"]), index(&["ny"]), index(&["nz"])) {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };
        let color = match (
            index(&["red", "diffuse_red", "r"]),
            index(&["green", "diffuse_green", "g"]),
            index(&["blue", "diffuse_blue", "b"]),
        ) {
            (Some(r), Some(g), Some(b)) => {
                let range = match &element.properties[r].kind {
                    PropertyKind::Scalar(ty) => ty.color_range(),
                    PropertyKind::List { .. } => 1.0,
                };
                Some(([r, g, b], range))
            }
            _ => None,
        };
        Ok(Self {
            position: [x, y, z],
            normal,
            color,
        })
    }
}

pub struct PlyDecoder;

impl Decoder for PlyDecoder {
    fn format(&self) -> AssetFormat {
        FORMAT
    }

    fn decode<'a>(
        &'a self,
        input: DecodeInput,
        ctx: DecodeContext<'a>,
    ) -> BoxFuture<'a, Result<DecodedAsset, LoadError>> {
        Box::pin(async move {
            decode_ply(&input.bytes, &input.name, ctx.config, ctx.progress, ctx.cancel)
        })
    }
}

pub fn decode_ply(
    data: &[u8],
    name: &str,
    config: &LoaderConfig,
    progress: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<DecodedAsset, LoadError> {
    let header = PlyHeader::parse(data)?;
    let body = &data[header.body_offset.min(data.len())..];
    let mut reader = match header.encoding {
        Encoding::Ascii => BodyReader::Ascii(
            std::str::from_utf8(body)
                .map_err(|e| LoadError::decode(FORMAT, e))?
                .split_ascii_whitespace(),
        ),
        Encoding::BinaryLittleEndian => BodyReader::Binary(ByteReader::new(body, Endian::Little, FORMAT)),
        Encoding::BinaryBigEndian => BodyReader::Binary(ByteReader::new(body, Endian::Big, FORMAT)),
    };
    let total = header.record_total(body.len())?;
    log::info!(
        "Decoding PLY {name}: {:?}, elements {:?}",
        header.encoding,
        header
            .elements
            .iter()
            .map(|e| (e.name.as_str(), e.count))
            .collect::<Vec<_>>()
    );

    let mut geometry = Geometry::default();
    let mut indices = Vec::new();
    let mut values = Vec::new();
    let mut list = Vec::new();
    let mut done = 0usize;
    for element in &header.elements {
        let vertex_layout = match element.name.as_str() {
            "vertex" => Some(VertexLayout::of(element)?),
            _ => None,
        };
        let face_list = (element.name == "face")
            .then(|| element.index_of(&["vertex_indices", "vertex_index"]))
            .flatten();
        for _ in 0..element.count {
            if done % CHECKPOINT_INTERVAL == 0 {
                cancel.checkpoint()?;
                progress.update(done as u64, total as u64);
            }
            done += 1;
            values.clear();
            for (i, property) in element.properties.iter().enumerate() {
                match &property.kind {
                    PropertyKind::Scalar(ty) => values.push(reader.read(*ty)?),
                    PropertyKind::List { count, item } => {
                        reader.read_list(*count, *item, &mut list)?;
                        values.push(0.0);
                        if face_list == Some(i) {
                            // Fan triangulation, polygons are convex by convention
                            for k in 1..list.len().saturating_sub(1) {
                                indices.extend([list[0] as u32, list[k] as u32, list[k + 1] as u32]);
                            }
                        }
                    }
                }
            }
            if let Some(layout) = &vertex_layout {
                let [x, y, z] = layout.position;
                geometry
                    .positions
                    .push([values[x] as f32, values[y] as f32, values[z] as f32]);
                if let Some([a, b, c]) = layout.normal {
                    geometry
                        .normals
                        .push([values[a] as f32, values[b] as f32, values[c] as f32]);
                }
                if let Some(([r, g, b], range)) = layout.color {
                    geometry.colors.push([
                        (values[r] / range) as f32,
                        (values[g] / range) as f32,
                        (values[b] / range) as f32,
                    ]);
                }
            }
        }
    }
    progress.complete_stage();

    if geometry.positions.is_empty() {
        return Err(LoadError::decode(FORMAT, "file contains no vertices"));
    }
    let mut metadata = AssetMetadata {
        vertex_count: geometry.vertex_count(),
        ..Default::default()
    };
    let has_colors = geometry.has_colors();
    let kind = if indices.is_empty() {
        AssetKind::PointCloud
    } else {
        AssetKind::Mesh
    };
    let node: Box<dyn SceneNode> = match kind {
        AssetKind::Mesh => {
            geometry.indices = Some(indices);
            let dropped = geometry.sanitize_indices();
            if dropped > 0 {
                metadata.warn(format!("{name}: dropped {dropped} out-of-range face indices"));
            }
            if geometry.normals.len() != geometry.positions.len() {
                geometry.compute_normals();
            }
            metadata.triangle_count = geometry.indices.as_ref().map_or(0, |i| i.len() / 3);
            let material = Material::neutral(config.mesh_color).with_vertex_colors(has_colors);
            Box::new(MeshNode::new(name, geometry, material))
        }
        AssetKind::PointCloud => {
            metadata.point_count = geometry.vertex_count();
            let bounds = geometry.local_bounds();
            metadata.is_geographic = bounds.looks_geographic();
            metadata.source_bounds = Some(bounds);
            let material = Material::points(config.point_size, config.point_color, has_colors);
            Box::new(PointsNode::new(name, geometry, material))
        }
    };
    log::info!(
        "{name}: {} vertices, {} triangles, colors: {has_colors}",
        metadata.vertex_count,
        metadata.triangle_count
    );
    let mut root = ContainerNode::new(name, vec![]);
    root.add_child(node);
    Ok(DecodedAsset {
        kind,
        root: Box::new(root),
        format: FORMAT,
        metadata,
    })
}
