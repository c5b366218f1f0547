//! Data objects flowing between nodes.
//!
//! A `DataObject` is built and mutated by its producer as an owned value.
//! Publishing it (into a static output slot or a stream buffer) stamps its
//! version and moves it behind an `Arc`; from then on it is read-only and is
//! handed out to consumers as a [`FrameRef`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Dense image with interleaved channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl ImageFrame {
    /// Create an image, returning `None` when the buffer does not match the shape.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * channels as usize;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Image with every sample set to `value`.
    pub fn filled(width: u32, height: u32, channels: u8, value: u8) -> Self {
        Self {
            width,
            height,
            channels,
            pixels: vec![value; width as usize * height as usize * channels as usize],
        }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Sample at (x, y, channel).
    pub fn get(&self, x: u32, y: u32, channel: u8) -> Option<u8> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize
            + channel as usize;
        self.pixels.get(idx).copied()
    }
}

/// Triangle mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

/// Row-major 4x4 affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3 {
    pub matrix: [[f64; 4]; 4],
}

impl Transform3 {
    pub fn identity() -> Self {
        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { matrix }
    }

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut t = Self::identity();
        t.matrix[0][3] = x;
        t.matrix[1][3] = y;
        t.matrix[2][3] = z;
        t
    }
}

impl Default for Transform3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Payload carried by a [`DataObject`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Image(ImageFrame),
    Mesh(MeshData),
    Transform(Transform3),
    Scalar(f64),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Image(_) => PayloadKind::Image,
            Payload::Mesh(_) => PayloadKind::Mesh,
            Payload::Transform(_) => PayloadKind::Transform,
            Payload::Scalar(_) => PayloadKind::Scalar,
            Payload::Bytes(_) => PayloadKind::Bytes,
        }
    }
}

/// Payload type declared by a port. `Any` accepts every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    Image,
    Mesh,
    Transform,
    Scalar,
    Bytes,
    Any,
}

impl PayloadKind {
    /// Whether data declared as `produced` can be fed into a port declaring `self`.
    pub fn accepts(self, produced: PayloadKind) -> bool {
        self == PayloadKind::Any || produced == PayloadKind::Any || self == produced
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Image => "Image",
            PayloadKind::Mesh => "Mesh",
            PayloadKind::Transform => "Transform",
            PayloadKind::Scalar => "Scalar",
            PayloadKind::Bytes => "Bytes",
            PayloadKind::Any => "Any",
        };
        f.write_str(name)
    }
}

/// A unit of data produced by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    /// Logical timestamp assigned on publish (0 = not yet published).
    pub version: u64,
    /// Marks the final frame of a stream.
    pub last_frame: bool,
    /// Acquisition time reported by the source, if any.
    pub creation_time: Option<Duration>,
    /// Wall-clock time the object was created.
    pub created_at: DateTime<Utc>,
    pub payload: Payload,
}

impl DataObject {
    pub fn new(payload: Payload) -> Self {
        Self {
            version: 0,
            last_frame: false,
            creation_time: None,
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn image(image: ImageFrame) -> Self {
        Self::new(Payload::Image(image))
    }

    pub fn scalar(value: f64) -> Self {
        Self::new(Payload::Scalar(value))
    }

    pub fn with_last_frame(mut self, last: bool) -> Self {
        self.last_frame = last;
        self
    }

    pub fn with_creation_time(mut self, time: Duration) -> Self {
        self.creation_time = Some(time);
        self
    }

    #[inline]
    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    pub fn as_image(&self) -> Option<&ImageFrame> {
        match &self.payload {
            Payload::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_image_mut(&mut self) -> Option<&mut ImageFrame> {
        match &mut self.payload {
            Payload::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self.payload {
            Payload::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mesh(&self) -> Option<&MeshData> {
        match &self.payload {
            Payload::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<&Transform3> {
        match &self.payload {
            Payload::Transform(t) => Some(t),
            _ => None,
        }
    }
}

/// Read-only handle to a published data object.
///
/// `index` is the frame position within its stream (or the publish count of a
/// static output); `stream` identifies the buffer it came from, 0 for static
/// outputs.
#[derive(Clone)]
pub struct FrameRef {
    pub stream: u64,
    pub index: u64,
    data: Arc<DataObject>,
}

impl FrameRef {
    pub fn new(stream: u64, index: u64, data: Arc<DataObject>) -> Self {
        Self {
            stream,
            index,
            data,
        }
    }

    /// Shared pointer to the underlying object.
    pub fn data(&self) -> &Arc<DataObject> {
        &self.data
    }

    /// Whether two handles refer to the same published object.
    pub fn same_object(&self, other: &FrameRef) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Deref for FrameRef {
    type Target = DataObject;

    fn deref(&self) -> &DataObject {
        &self.data
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("stream", &self.stream)
            .field("index", &self.index)
            .field("version", &self.data.version)
            .field("kind", &self.data.kind())
            .field("last_frame", &self.data.last_frame)
            .finish()
    }
}
