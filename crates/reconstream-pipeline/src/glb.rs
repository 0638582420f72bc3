//! Binary glTF 2.0 (GLB) encoding of point clouds.
//!
//! Layout of the produced file:
//!
//! ```text
//! header   magic "glTF" | version 2 | total length
//! chunk 0  JSON  (padded with spaces to 4 bytes)
//! chunk 1  BIN   positions f32x3 | colors u8x4   (omitted for empty clouds)
//! ```
//!
//! The cloud is a single `POINTS` primitive. Cameras, when given, become
//! perspective camera nodes so viewers can show where each image was taken.

use serde_json::{json, Value};

use crate::types::{Camera, PointCloud};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_FLOAT: u32 = 5126;
const COMPONENT_UNSIGNED_BYTE: u32 = 5121;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const MODE_POINTS: u32 = 0;

/// Encode a cloud (and optionally its cameras) as a GLB file.
pub fn encode(cloud: &PointCloud, cameras: &[Camera]) -> Vec<u8> {
    let count = cloud.points.len().min(cloud.colors.len());

    let mut bin = Vec::with_capacity(count * 16);
    for p in &cloud.points[..count] {
        for v in p {
            bin.extend_from_slice(&v.to_le_bytes());
        }
    }
    let positions_len = bin.len();
    for c in &cloud.colors[..count] {
        bin.extend_from_slice(&[c[0], c[1], c[2], 255]);
    }
    let colors_len = bin.len() - positions_len;

    let document = document(cloud, count, positions_len, colors_len, cameras);
    // Serializing a `Value` cannot fail.
    let mut json_bytes = serde_json::to_vec(&document).unwrap_or_default();
    pad_to_four(&mut json_bytes, b' ');
    pad_to_four(&mut bin, 0);

    let mut total = 12 + 8 + json_bytes.len();
    if !bin.is_empty() {
        total += 8 + bin.len();
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());

    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);

    if !bin.is_empty() {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin);
    }

    out
}

fn document(
    cloud: &PointCloud,
    count: usize,
    positions_len: usize,
    colors_len: usize,
    cameras: &[Camera],
) -> Value {
    let mut nodes = Vec::new();
    let mut doc = json!({
        "asset": { "version": "2.0", "generator": "reconstream" },
        "scene": 0,
    });

    if count > 0 {
        // Bounds over the encoded points only.
        let encoded = PointCloud {
            points: cloud.points[..count].to_vec(),
            ..Default::default()
        };
        let (min, max) = encoded.bounds().unwrap_or(([0.0; 3], [0.0; 3]));

        nodes.push(json!({ "name": "point_cloud", "mesh": 0 }));
        doc["meshes"] = json!([{
            "primitives": [{
                "attributes": { "POSITION": 0, "COLOR_0": 1 },
                "mode": MODE_POINTS,
            }]
        }]);
        doc["buffers"] = json!([{ "byteLength": padded(positions_len + colors_len) }]);
        doc["bufferViews"] = json!([
            {
                "buffer": 0,
                "byteOffset": 0,
                "byteLength": positions_len,
                "target": TARGET_ARRAY_BUFFER,
            },
            {
                "buffer": 0,
                "byteOffset": positions_len,
                "byteLength": colors_len,
                "target": TARGET_ARRAY_BUFFER,
            }
        ]);
        doc["accessors"] = json!([
            {
                "bufferView": 0,
                "componentType": COMPONENT_FLOAT,
                "count": count,
                "type": "VEC3",
                "min": min,
                "max": max,
            },
            {
                "bufferView": 1,
                "componentType": COMPONENT_UNSIGNED_BYTE,
                "normalized": true,
                "count": count,
                "type": "VEC4",
            }
        ]);
    }

    if !cameras.is_empty() {
        let mut gltf_cameras = Vec::with_capacity(cameras.len());
        for (i, camera) in cameras.iter().enumerate() {
            let (width, height) = camera.image_size();
            let fy = camera.intrinsics[1][1].max(f32::EPSILON);
            let yfov = 2.0 * (height / (2.0 * fy)).atan();
            let aspect = if height > 0.0 { width / height } else { 1.0 };
            gltf_cameras.push(json!({
                "type": "perspective",
                "perspective": { "yfov": yfov, "aspectRatio": aspect, "znear": 0.01 },
            }));
            nodes.push(json!({
                "name": format!("camera_{:04}", i),
                "camera": i,
                "matrix": gltf_matrix(camera),
            }));
        }
        doc["cameras"] = Value::Array(gltf_cameras);
    }

    let node_ids: Vec<usize> = (0..nodes.len()).collect();
    doc["nodes"] = Value::Array(nodes);
    doc["scenes"] = json!([{ "nodes": node_ids }]);
    doc
}

/// Column-major node matrix for a camera, converted from OpenCV axes
/// (+Y down, +Z forward) to glTF axes (+Y up, -Z forward).
fn gltf_matrix(camera: &Camera) -> [f32; 16] {
    let m = camera.camera_to_world();
    let flip = [1.0f32, -1.0, -1.0, 1.0];
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = m[row][col] * flip[col];
        }
    }
    out
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn pad_to_four(bytes: &mut Vec<u8>, fill: u8) {
    bytes.resize(padded(bytes.len()), fill);
}
