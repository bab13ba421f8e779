//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{ImageFormat, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use pdfpress_core::{
    Bitmap, BuiltinRasterizer, CancelToken, Engine, EngineConfig, Page, Rasterizer, RenderError,
    Resolution, Rotation,
};

/// Side of the square fixture images, in pixels and points
pub const IMAGE_SIDE: u32 = 300;

pub fn engine() -> Engine {
    Engine::new(EngineConfig {
        workers: Some(2),
        ..EngineConfig::default()
    })
    .unwrap()
}

fn finish(mut doc: Document, pages_id: lopdf::ObjectId, kids: Vec<Object>) -> Vec<u8> {
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Object::Array(kids),
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Text-only PDF; page N shows `{prefix}-Page-{N}`
pub fn text_pdf(num_pages: u32, prefix: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for page_num in 0..num_pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("{}-Page-{}", prefix, page_num + 1))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
        });
        kids.push(page_id.into());
    }

    finish(doc, pages_id, kids)
}

/// How the pixels of an image-only fixture page are stored
#[derive(Debug, Clone, Copy)]
pub enum ImageFill {
    /// Smooth gradient, stored uncompressed
    RawGradient,
    /// One flat colour, deflated
    DeflatedSolid,
}

fn pixels(fill: ImageFill) -> Vec<u8> {
    let mut data = Vec::with_capacity((IMAGE_SIDE * IMAGE_SIDE * 3) as usize);
    for y in 0..IMAGE_SIDE {
        for x in 0..IMAGE_SIDE {
            match fill {
                ImageFill::RawGradient => data.extend_from_slice(&[
                    (x * 255 / IMAGE_SIDE) as u8,
                    (y * 255 / IMAGE_SIDE) as u8,
                    128,
                ]),
                ImageFill::DeflatedSolid => data.extend_from_slice(&[200, 200, 200]),
            }
        }
    }
    data
}

/// PDF whose pages each show one image covering the whole page
pub fn image_only_pdf(fills: &[ImageFill]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    let side = IMAGE_SIDE as i64;

    for fill in fills {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => side,
            "Height" => side,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        let content = match fill {
            ImageFill::RawGradient => pixels(*fill),
            ImageFill::DeflatedSolid => {
                dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
                encoder.write_all(&pixels(*fill)).unwrap();
                encoder.finish().unwrap()
            }
        };
        let image_id = doc.add_object(Stream::new(dict, content).with_compression(false));

        let draw = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![side.into(), 0.into(), 0.into(), side.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(
            Stream::new(Dictionary::new(), draw.encode().unwrap()).with_compression(false),
        );
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), side.into(), side.into()]),
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    finish(doc, pages_id, kids)
}

pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let mut out = Vec::new();
    RgbImage::from_fn(width, height, |x, y| Rgb([shade, (x % 256) as u8, (y % 256) as u8]))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let mut out = Vec::new();
    RgbImage::from_fn(width, height, |x, y| Rgb([shade, (x % 256) as u8, (y % 256) as u8]))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

/// Text content of every page of `bytes`, in page order
pub fn page_texts(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
        .collect()
}

/// Builtin rasterizer that counts its renders
#[derive(Default)]
pub struct CountingRasterizer {
    renders: AtomicUsize,
}

impl CountingRasterizer {
    pub fn count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl Rasterizer for CountingRasterizer {
    fn render(
        &self,
        page: &Page,
        rotation: Rotation,
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Bitmap, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        BuiltinRasterizer.render(page, rotation, resolution, cancel)
    }
}

pub fn counting_engine() -> (Arc<Engine>, Arc<CountingRasterizer>) {
    let rasterizer = Arc::new(CountingRasterizer::default());
    let engine = Engine::with_rasterizer(EngineConfig::default(), rasterizer.clone()).unwrap();
    (Arc::new(engine), rasterizer)
}
