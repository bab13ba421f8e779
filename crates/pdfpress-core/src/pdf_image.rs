//! Raster images inside PDFs
//!
//! Decoding image XObjects into bitmaps, and wrapping JPEG/PNG payloads
//! into single-page PDFs without re-encoding them.

use std::io::{Cursor, Read};

use flate2::read::ZlibDecoder;
use image::codecs::jpeg::JpegDecoder;
use image::codecs::png::PngEncoder;
use image::{
    DynamicImage, ExtendedColorType, GrayImage, ImageDecoder, ImageEncoder, ImageFormat, RgbImage,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use crate::error::RenderError;
use crate::page::SourceFormat;
use crate::page_tree::resolve;

/// Colour model of an 8-bit image XObject
enum ColorModel {
    Gray,
    Rgb,
    /// RGB lookup table, three bytes per entry
    Indexed(Vec<u8>),
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Indexed(_) => 1,
            ColorModel::Rgb => 3,
        }
    }
}

fn filter_name(stream: &Stream) -> Result<Option<Vec<u8>>, RenderError> {
    match stream.dict.get(b"Filter") {
        Err(_) => Ok(None),
        Ok(Object::Name(name)) => Ok(Some(name.clone())),
        Ok(Object::Array(filters)) => match filters.as_slice() {
            [] => Ok(None),
            [Object::Name(name)] => Ok(Some(name.clone())),
            _ => Err(RenderError::Unsupported("chained image filters".into())),
        },
        Ok(_) => Err(RenderError::Decode("malformed /Filter entry".into())),
    }
}

fn dict_int(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|v| v.as_i64().ok())
}

fn color_model(doc: &Document, obj: &Object) -> Result<ColorModel, RenderError> {
    let obj = resolve(doc, obj).ok_or_else(|| RenderError::Decode("dangling colour space".into()))?;

    match obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorModel::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorModel::Rgb),
            other => Err(RenderError::Unsupported(format!(
                "colour space {}",
                String::from_utf8_lossy(other)
            ))),
        },
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|f| f.as_name().ok())
                .ok_or_else(|| RenderError::Decode("colour space array without family".into()))?;

            match family {
                b"ICCBased" => {
                    let components = items
                        .get(1)
                        .and_then(|s| resolve(doc, s))
                        .and_then(|s| s.as_stream().ok())
                        .and_then(|s| dict_int(&s.dict, b"N"));
                    match components {
                        Some(1) => Ok(ColorModel::Gray),
                        Some(3) => Ok(ColorModel::Rgb),
                        _ => Err(RenderError::Unsupported(
                            "ICC profile with other than 1 or 3 components".into(),
                        )),
                    }
                }
                b"CalGray" => Ok(ColorModel::Gray),
                b"CalRGB" => Ok(ColorModel::Rgb),
                b"Indexed" | b"I" => {
                    let base = items
                        .get(1)
                        .ok_or_else(|| RenderError::Decode("indexed space without base".into()))?;
                    if !matches!(color_model(doc, base)?, ColorModel::Rgb) {
                        return Err(RenderError::Unsupported("indexed over non-RGB base".into()));
                    }
                    let lookup = items
                        .get(3)
                        .and_then(|l| resolve(doc, l))
                        .ok_or_else(|| RenderError::Decode("indexed space without lookup".into()))?;
                    let table = match lookup {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(s) => s
                            .decompressed_content()
                            .unwrap_or_else(|_| s.content.clone()),
                        _ => return Err(RenderError::Decode("malformed lookup table".into())),
                    };
                    Ok(ColorModel::Indexed(table))
                }
                other => Err(RenderError::Unsupported(format!(
                    "colour space {}",
                    String::from_utf8_lossy(other)
                ))),
            }
        }
        _ => Err(RenderError::Decode("malformed colour space".into())),
    }
}

/// Undo PNG row predictors (PDF Predictor >= 10)
pub(crate) fn unpredict_png(
    data: &[u8],
    bytes_per_pixel: usize,
    row_len: usize,
) -> Result<Vec<u8>, RenderError> {
    let stride = row_len + 1;
    if row_len == 0 || data.len() < stride {
        return Err(RenderError::Decode("predicted data shorter than one row".into()));
    }

    let rows = data.len() / stride;
    let mut out = vec![0u8; rows * row_len];

    for row in 0..rows {
        let filter = data[row * stride];
        let src = &data[row * stride + 1..(row + 1) * stride];
        let (done, rest) = out.split_at_mut(row * row_len);
        let prev = if row == 0 {
            None
        } else {
            Some(&done[(row - 1) * row_len..])
        };
        let cur = &mut rest[..row_len];

        for i in 0..row_len {
            let left = if i >= bytes_per_pixel { cur[i - bytes_per_pixel] } else { 0 };
            let up = prev.map(|p| p[i]).unwrap_or(0);
            let up_left = match prev {
                Some(p) if i >= bytes_per_pixel => p[i - bytes_per_pixel],
                _ => 0,
            };
            let predicted = match filter {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(RenderError::Decode(format!("unknown PNG filter type {}", other)))
                }
            };
            cur[i] = src[i].wrapping_add(predicted);
        }
    }

    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Decode an image XObject into a bitmap
pub(crate) fn decode_image_xobject(
    doc: &Document,
    stream: &Stream,
) -> Result<DynamicImage, RenderError> {
    let filter = filter_name(stream)?;

    if filter.as_deref() == Some(b"DCTDecode".as_slice()) {
        return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .map_err(|e| RenderError::Decode(format!("embedded JPEG: {}", e)));
    }

    let width = dict_int(&stream.dict, b"Width")
        .filter(|w| *w > 0)
        .ok_or_else(|| RenderError::Decode("image without /Width".into()))? as u32;
    let height = dict_int(&stream.dict, b"Height")
        .filter(|h| *h > 0)
        .ok_or_else(|| RenderError::Decode("image without /Height".into()))? as u32;
    if dict_int(&stream.dict, b"BitsPerComponent").unwrap_or(8) != 8 {
        return Err(RenderError::Unsupported("bit depth other than 8".into()));
    }

    let space = stream
        .dict
        .get(b"ColorSpace")
        .map_err(|_| RenderError::Decode("image without /ColorSpace".into()))?;
    let model = color_model(doc, space)?;
    let row_len = width as usize * model.components();

    let data = match filter.as_deref() {
        None => stream.content.clone(),
        Some(b"FlateDecode") => {
            let mut inflated = Vec::new();
            ZlibDecoder::new(stream.content.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| RenderError::Decode(format!("inflate: {}", e)))?;

            let predictor = stream
                .dict
                .get(b"DecodeParms")
                .ok()
                .and_then(|p| resolve(doc, p))
                .and_then(|p| p.as_dict().ok())
                .and_then(|p| dict_int(p, b"Predictor"))
                .unwrap_or(1);
            match predictor {
                1 => inflated,
                p if p >= 10 => unpredict_png(&inflated, model.components(), row_len)?,
                other => {
                    return Err(RenderError::Unsupported(format!("predictor {}", other)))
                }
            }
        }
        Some(other) => {
            return Err(RenderError::Unsupported(format!(
                "image filter {}",
                String::from_utf8_lossy(other)
            )))
        }
    };

    let expected = row_len * height as usize;
    if data.len() < expected {
        return Err(RenderError::Decode(format!(
            "image data has {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    let data = &data[..expected];

    let image = match model {
        ColorModel::Gray => GrayImage::from_raw(width, height, data.to_vec()).map(DynamicImage::ImageLuma8),
        ColorModel::Rgb => RgbImage::from_raw(width, height, data.to_vec()).map(DynamicImage::ImageRgb8),
        ColorModel::Indexed(table) => {
            let mut rgb = Vec::with_capacity(expected * 3);
            for &index in data {
                let at = index as usize * 3;
                let entry = table
                    .get(at..at + 3)
                    .ok_or_else(|| RenderError::Decode("palette index out of range".into()))?;
                rgb.extend_from_slice(entry);
            }
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
    };

    image.ok_or_else(|| RenderError::Decode("pixel buffer size mismatch".into()))
}

/// Composite any alpha channel over a white background
pub(crate) fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 255 * (255 - a as u16)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

/// JPEG-encode a bitmap
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, RenderError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| RenderError::Encode(format!("JPEG: {}", e)))?;
    Ok(buf)
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| RenderError::Encode(format!("PNG: {}", e)))?;
    Ok(buf)
}

/// Image XObject ready to be placed on a page
pub(crate) struct ImageXObject {
    pub stream: Stream,
    pub width: u32,
    pub height: u32,
}

fn image_dict(width: u32, height: u32, color_space: Object) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
    }
}

/// Start-of-frame components, the only thing the generic decoder hides
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    let mut at = 2;
    while at + 4 <= bytes.len() {
        if bytes[at] != 0xFF {
            return None;
        }
        let marker = bytes[at + 1];
        let len = u16::from_be_bytes([bytes[at + 2], bytes[at + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            return bytes.get(at + 9).copied();
        }
        at += 2 + len;
    }
    None
}

/// Pass JPEG data through as a DCTDecode stream
pub(crate) fn jpeg_xobject(bytes: &[u8]) -> Result<ImageXObject, RenderError> {
    let decoder = JpegDecoder::new(Cursor::new(bytes))
        .map_err(|e| RenderError::Decode(format!("JPEG header: {}", e)))?;
    let (width, height) = decoder.dimensions();

    let color_space = match jpeg_components(bytes) {
        Some(1) => "DeviceGray",
        Some(3) => "DeviceRGB",
        _ => return Err(RenderError::Unsupported("JPEG colour model".into())),
    };

    let mut dict = image_dict(width, height, Object::Name(color_space.as_bytes().to_vec()));
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    Ok(ImageXObject {
        stream: Stream::new(dict, bytes.to_vec()).with_compression(false),
        width,
        height,
    })
}

/// Concatenated IDAT payload of a PNG file
fn png_idat(bytes: &[u8]) -> Result<Vec<u8>, RenderError> {
    const SIGNATURE_LEN: usize = 8;
    let mut at = SIGNATURE_LEN;
    let mut idat = Vec::new();

    while at + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
            as usize;
        let kind = &bytes[at + 4..at + 8];
        let data = bytes
            .get(at + 8..at + 8 + len)
            .ok_or_else(|| RenderError::Decode("truncated PNG chunk".into()))?;
        match kind {
            b"IDAT" => idat.extend_from_slice(data),
            b"IEND" => break,
            _ => {}
        }
        at += 12 + len;
    }

    if idat.is_empty() {
        return Err(RenderError::Decode("PNG without image data".into()));
    }
    Ok(idat)
}

/// Pass PNG data through as a FlateDecode stream with PNG predictors
///
/// Only 8-bit gray, RGB and palette images without interlacing or
/// transparency map directly onto a PDF image.
pub(crate) fn png_xobject(bytes: &[u8]) -> Result<ImageXObject, RenderError> {
    let reader = png::Decoder::new(bytes)
        .read_info()
        .map_err(|e| RenderError::Decode(format!("PNG header: {}", e)))?;
    let info = reader.info();

    if info.bit_depth != png::BitDepth::Eight || info.interlaced || info.trns.is_some() {
        return Err(RenderError::Unsupported("PNG layout".into()));
    }

    let (color_space, colors) = match info.color_type {
        png::ColorType::Grayscale => (Object::Name(b"DeviceGray".to_vec()), 1),
        png::ColorType::Rgb => (Object::Name(b"DeviceRGB".to_vec()), 3),
        png::ColorType::Indexed => {
            let palette = info
                .palette
                .as_ref()
                .ok_or_else(|| RenderError::Decode("indexed PNG without palette".into()))?;
            let entries = palette.len() / 3;
            (
                Object::Array(vec![
                    Object::Name(b"Indexed".to_vec()),
                    Object::Name(b"DeviceRGB".to_vec()),
                    Object::Integer(entries as i64 - 1),
                    Object::String(palette.to_vec(), lopdf::StringFormat::Hexadecimal),
                ]),
                1,
            )
        }
        _ => return Err(RenderError::Unsupported("PNG colour type".into())),
    };

    let (width, height) = (info.width, info.height);
    let mut dict = image_dict(width, height, color_space);
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    dict.set(
        "DecodeParms",
        dictionary! {
            "Predictor" => 15,
            "Colors" => colors,
            "BitsPerComponent" => 8,
            "Columns" => width as i64,
        },
    );

    Ok(ImageXObject {
        stream: Stream::new(dict, png_idat(bytes)?).with_compression(false),
        width,
        height,
    })
}

/// Wrap image bytes, re-encoding to an RGB PNG only when passthrough is
/// impossible
pub(crate) fn image_xobject(bytes: &[u8], format: SourceFormat) -> Result<ImageXObject, RenderError> {
    let direct = match format {
        SourceFormat::Jpeg => jpeg_xobject(bytes),
        SourceFormat::Png => png_xobject(bytes),
        SourceFormat::Pdf => Err(RenderError::Unsupported("PDF is not an image".into())),
    };

    match direct {
        Ok(xobject) => Ok(xobject),
        Err(RenderError::Unsupported(_)) if format != SourceFormat::Pdf => {
            let decoded = image::load_from_memory(bytes)
                .map_err(|e| RenderError::Decode(format!("image: {}", e)))?;
            png_xobject(&encode_png(&flatten_onto_white(&decoded))?)
        }
        Err(e) => Err(e),
    }
}

/// One-page document showing `xobject` across a `width_pt` x `height_pt`
/// page
pub(crate) fn image_page_document(
    xobject: ImageXObject,
    width_pt: f64,
    height_pt: f64,
) -> Result<Document, RenderError> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(xobject.stream);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width_pt as f32),
                    0.into(),
                    0.into(),
                    Object::Real(height_pt as f32),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content
        .encode()
        .map_err(|e| RenderError::Encode(format!("content stream: {}", e)))?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            Object::Real(width_pt as f32),
            Object::Real(height_pt as f32),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

/// Serialized form of `image_page_document`
pub(crate) fn single_image_page(
    xobject: ImageXObject,
    width_pt: f64,
    height_pt: f64,
) -> Result<Vec<u8>, RenderError> {
    let mut doc = image_page_document(xobject, width_pt, height_pt)?;
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| RenderError::Encode(format!("image page: {}", e)))?;
    Ok(buffer)
}
