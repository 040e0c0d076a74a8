use image::{Rgb, RgbImage};

use crate::detect::result::{Detection, ObjectClass};

fn class_color(class: ObjectClass) -> Rgb<u8> {
    match class {
        ObjectClass::Person => Rgb([0, 255, 0]),
        ObjectClass::Vehicle => Rgb([0, 160, 255]),
        ObjectClass::Animal => Rgb([255, 200, 0]),
        ObjectClass::Package => Rgb([200, 0, 255]),
        ObjectClass::Motion => Rgb([255, 64, 64]),
        ObjectClass::Unknown => Rgb([255, 255, 255]),
    }
}

/// Draw one outline per detection, `line_size` pixels thick, inside the box.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection], line_size: u32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for detection in detections {
        let left = (detection.x * width as f32).round() as i64;
        let top = (detection.y * height as f32).round() as i64;
        let right = ((detection.x + detection.w) * width as f32).round() as i64 - 1;
        let bottom = ((detection.y + detection.h) * height as f32).round() as i64 - 1;
        draw_rectangle(
            image,
            left,
            top,
            right,
            bottom,
            line_size,
            class_color(detection.class),
        );
    }
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
    line_size: u32,
    color: Rgb<u8>,
) {
    let (width, height) = image.dimensions();
    let left = left.clamp(0, width as i64 - 1);
    let right = right.clamp(0, width as i64 - 1);
    let top = top.clamp(0, height as i64 - 1);
    let bottom = bottom.clamp(0, height as i64 - 1);
    if right < left || bottom < top {
        return;
    }
    let line = line_size.max(1) as i64;
    for y in top..=bottom {
        for x in left..=right {
            let on_edge = x < left + line || x > right - line || y < top + line || y > bottom - line;
            if on_edge {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
