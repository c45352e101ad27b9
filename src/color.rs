//! RGBA 颜色模型：解析、格式化、HSL 调整与通道运算。
//! 同时服务于值模型的 `operate` 分发和内置颜色函数。

/// 归一化到 0..1 的 RGBA 颜色。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Rgba {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }.clamp()
    }

    fn clamp(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    /// 解析 `#rgb` / `#rrggbb` / `#rrggbbaa` / `rgb()` / `rgba()` 形式。
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if let Some(stripped) = trimmed.strip_prefix('#') {
            return parse_hex(stripped);
        }
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("rgba") {
            return parse_rgb_function(&lowered, true);
        }
        if lowered.starts_with("rgb") {
            return parse_rgb_function(&lowered, false);
        }
        None
    }

    pub fn lighten(self, amount: f64) -> Self {
        let (h, s, l) = self.to_hsl();
        Self::from_hsl(h, s, (l + amount).clamp(0.0, 1.0), self.a)
    }

    pub fn darken(self, amount: f64) -> Self {
        let (h, s, l) = self.to_hsl();
        Self::from_hsl(h, s, (l - amount).clamp(0.0, 1.0), self.a)
    }

    pub fn fade(self, amount: f64) -> Self {
        Self {
            a: amount.clamp(0.0, 1.0),
            ..self
        }
        .clamp()
    }

    pub fn overlay_onto(self, bottom: Self) -> Self {
        color_blend(blend_overlay, bottom, self)
    }

    /// 逐通道算术运算，alpha 取两者较大值。
    pub fn channel_op(self, op: char, other: Self) -> Option<Self> {
        let apply = |a: f64, b: f64| -> Option<f64> {
            let a = a * 255.0;
            let b = b * 255.0;
            let r = match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b / 255.0,
                '/' => {
                    if b.abs() < f64::EPSILON {
                        return None;
                    }
                    a / b * 255.0
                }
                _ => return None,
            };
            Some(r / 255.0)
        };
        Some(
            Self {
                r: apply(self.r, other.r)?,
                g: apply(self.g, other.g)?,
                b: apply(self.b, other.b)?,
                a: self.a.max(other.a),
            }
            .clamp(),
        )
    }

    /// 与无单位数值做逐通道运算。
    pub fn scalar_op(self, op: char, scalar: f64, color_on_left: bool) -> Option<Self> {
        let gray = Self::new(scalar / 255.0, scalar / 255.0, scalar / 255.0, 1.0);
        if color_on_left {
            self.channel_op(op, gray)
        } else {
            gray.channel_op(op, self)
        }
    }

    pub fn to_hex(self) -> String {
        let c = self.clamp();
        format!(
            "#{:02x}{:02x}{:02x}",
            to_channel(c.r),
            to_channel(c.g),
            to_channel(c.b)
        )
    }

    pub fn to_rgba_string(self) -> String {
        let c = self.clamp();
        format!(
            "rgba({}, {}, {}, {})",
            to_channel(c.r),
            to_channel(c.g),
            to_channel(c.b),
            format_alpha(c.a)
        )
    }

    /// alpha 为 1 时输出十六进制，否则输出 rgba() 形式。
    pub fn to_css(self) -> String {
        if (self.a - 1.0).abs() < f64::EPSILON {
            self.to_hex()
        } else {
            self.to_rgba_string()
        }
    }

    fn to_hsl(self) -> (f64, f64, f64) {
        let Rgba { r, g, b, .. } = self;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;

        if (max - min).abs() < f64::EPSILON {
            return (0.0, 0.0, l);
        }

        let d = max - min;
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };

        let h = if (max - r).abs() < f64::EPSILON {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if (max - g).abs() < f64::EPSILON {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        } / 6.0;

        (h, s, l)
    }

    fn from_hsl(h: f64, s: f64, l: f64, alpha: f64) -> Self {
        if s <= 0.0 {
            return Self {
                r: l,
                g: l,
                b: l,
                a: alpha,
            };
        }

        let q = if l < 0.5 {
            l * (1.0 + s)
        } else {
            l + s - l * s
        };
        let p = 2.0 * l - q;

        Self {
            r: hue_to_rgb(p, q, h + 1.0 / 3.0),
            g: hue_to_rgb(p, q, h),
            b: hue_to_rgb(p, q, h - 1.0 / 3.0),
            a: alpha,
        }
        .clamp()
    }
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    let channel = |range: &str| u8::from_str_radix(range, 16).ok();
    match hex.len() {
        3 => Some(Rgba {
            r: (channel(&hex[0..1])? * 17) as f64 / 255.0,
            g: (channel(&hex[1..2])? * 17) as f64 / 255.0,
            b: (channel(&hex[2..3])? * 17) as f64 / 255.0,
            a: 1.0,
        }),
        6 => Some(Rgba {
            r: channel(&hex[0..2])? as f64 / 255.0,
            g: channel(&hex[2..4])? as f64 / 255.0,
            b: channel(&hex[4..6])? as f64 / 255.0,
            a: 1.0,
        }),
        8 => Some(Rgba {
            r: channel(&hex[0..2])? as f64 / 255.0,
            g: channel(&hex[2..4])? as f64 / 255.0,
            b: channel(&hex[4..6])? as f64 / 255.0,
            a: channel(&hex[6..8])? as f64 / 255.0,
        }),
        _ => None,
    }
}

fn parse_rgb_function(input: &str, has_alpha: bool) -> Option<Rgba> {
    let start = input.find('(')? + 1;
    let end = input.rfind(')')?;
    let parts: Vec<&str> = input[start..end].split(',').map(|s| s.trim()).collect();
    if (has_alpha && parts.len() != 4) || (!has_alpha && parts.len() != 3) {
        return None;
    }
    let r: u8 = parts[0].parse().ok()?;
    let g: u8 = parts[1].parse().ok()?;
    let b: u8 = parts[2].parse().ok()?;
    let a = if has_alpha {
        parse_alpha(parts[3])?
    } else {
        1.0
    };
    Some(Rgba {
        r: r as f64 / 255.0,
        g: g as f64 / 255.0,
        b: b as f64 / 255.0,
        a,
    })
}

fn parse_alpha(input: &str) -> Option<f64> {
    if let Some(value) = input.strip_suffix('%') {
        let num: f64 = value.parse().ok()?;
        Some((num / 100.0).clamp(0.0, 1.0))
    } else {
        input.parse().ok().map(|v: f64| v.clamp(0.0, 1.0))
    }
}

fn color_blend<F>(mode: F, bottom: Rgba, top: Rgba) -> Rgba
where
    F: Fn(f64, f64) -> f64 + Copy,
{
    let ab = bottom.a;
    let at = top.a;
    let ar = at + ab * (1.0 - at);
    let bottom_channels = [bottom.r, bottom.g, bottom.b];
    let top_channels = [top.r, top.g, top.b];
    let mut result = [0.0; 3];
    for i in 0..3 {
        let cb = bottom_channels[i];
        let cs = top_channels[i];
        let mut cr = mode(cb, cs);
        if ar > 0.0 {
            cr = (at * cs + ab * (cb - at * (cb + cs - cr))) / ar;
        }
        result[i] = cr;
    }
    Rgba {
        r: result[0],
        g: result[1],
        b: result[2],
        a: ar,
    }
    .clamp()
}

fn blend_multiply(a: f64, b: f64) -> f64 {
    a * b
}

fn blend_screen(a: f64, b: f64) -> f64 {
    a + b - a * b
}

fn blend_overlay(base: f64, overlay: f64) -> f64 {
    if base <= 0.5 {
        blend_multiply(base * 2.0, overlay)
    } else {
        blend_screen(base * 2.0 - 1.0, overlay)
    }
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        _ if t < 1.0 / 6.0 => p + (q - p) * 6.0 * t,
        _ if t < 1.0 / 2.0 => q,
        _ if t < 2.0 / 3.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

fn to_channel(value: f64) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn format_alpha(value: f64) -> String {
    let mut formatted = format!("{value:.3}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    if formatted.is_empty() {
        "0".to_string()
    } else {
        formatted
    }
}
