//! Drawing primitives over `RgbImage`, backed by embedded-graphics.
//!
//! Everything outside the image is clipped.

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_7X13},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle},
    text::Text,
};
use image::{Rgb, RgbImage};

pub type Color = Rgb888;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSize {
    Large,
    Small,
}

impl TextSize {
    fn font(self) -> &'static MonoFont<'static> {
        match self {
            TextSize::Large => &FONT_10X20,
            TextSize::Small => &FONT_7X13,
        }
    }
}

/// Filled disc centered on `(x, y)`.
pub fn draw_marker(image: &mut RgbImage, x: i32, y: i32, radius: u32, color: Color) {
    let diameter = radius * 2 + 1;
    unwrap_infallible(
        Circle::with_center(Point::new(x, y), diameter)
            .into_styled(PrimitiveStyle::with_fill(color))
            .draw(&mut Canvas(image)),
    );
}

pub fn draw_line(
    image: &mut RgbImage,
    start: (i32, i32),
    end: (i32, i32),
    color: Color,
    stroke_width: u32,
) {
    unwrap_infallible(
        Line::new(Point::new(start.0, start.1), Point::new(end.0, end.1))
            .into_styled(PrimitiveStyle::with_stroke(color, stroke_width))
            .draw(&mut Canvas(image)),
    );
}

/// Draws `text` with its baseline starting at `(x, y)`.
pub fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, size: TextSize, color: Color) {
    let style = MonoTextStyle::new(size.font(), color);
    unwrap_infallible(Text::new(text, Point::new(x, y), style).draw(&mut Canvas(image)));
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

struct Canvas<'a>(&'a mut RgbImage);

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.0.dimensions();
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && point.y >= 0
                && (point.x as u32) < width
                && (point.y as u32) < height
            {
                self.0.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }
        Ok(())
    }
}
