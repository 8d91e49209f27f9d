//! PDF 1.4 rendering: A4 pages, Helvetica 12 pt, left-aligned paragraphs.

use pdf_writer::Finish;
use pdf_writer::{Content, Name, Pdf, Rect, Ref, Str, TextStr};

const PAGE_WIDTH: f32 = 595.28;
const PAGE_HEIGHT: f32 = 841.89;
const MARGIN: f32 = 56.69;
const FONT_SIZE: f32 = 12.0;
const LEADING: f32 = 14.0;
const FONT_NAME: Name<'static> = Name(b"F1");

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];
const DEFAULT_WIDTH: u16 = 556;

pub(super) fn render(title: &str, text: &str) -> Vec<u8> {
    let lines = layout(text, PAGE_WIDTH - 2.0 * MARGIN);
    let per_page = (((PAGE_HEIGHT - 2.0 * MARGIN) / LEADING).floor() as usize).max(1);
    let pages: Vec<&[String]> = if lines.is_empty() {
        vec![&lines[..]]
    } else {
        lines.chunks(per_page).collect()
    };

    // 1 catalog, 2 page tree, 3 font, 4 info, then (page, contents) pairs.
    let catalog_id = Ref::new(1);
    let tree_id = Ref::new(2);
    let font_id = Ref::new(3);
    let info_id = Ref::new(4);
    let page_ids: Vec<Ref> = (0..pages.len())
        .map(|index| Ref::new(5 + 2 * index as i32))
        .collect();

    let mut pdf = Pdf::new();
    pdf.set_version(1, 4);
    pdf.catalog(catalog_id).pages(tree_id);
    pdf.pages(tree_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);
    pdf.type1_font(font_id)
        .base_font(Name(b"Helvetica"))
        .encoding_predefined(Name(b"WinAnsiEncoding"));
    pdf.document_info(info_id)
        .title(TextStr(title))
        .producer(TextStr("bookgen"));

    for (lines, page_id) in pages.iter().zip(&page_ids) {
        let content_id = Ref::new(page_id.get() + 1);
        let mut page = pdf.page(*page_id);
        page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
        page.parent(tree_id);
        page.contents(content_id);
        page.resources().fonts().pair(FONT_NAME, font_id);
        page.finish();

        pdf.stream(content_id, &page_content(lines));
    }

    pdf.finish()
}

fn page_content(lines: &[String]) -> Vec<u8> {
    let mut content = Content::new();
    content.begin_text();
    content.set_font(FONT_NAME, FONT_SIZE);
    content.set_leading(LEADING);
    content.next_line(MARGIN, PAGE_HEIGHT - MARGIN - FONT_SIZE);
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            content.next_line_using_leading();
        }
        if !line.is_empty() {
            content.show(Str(&latin1_bytes(line)));
        }
    }
    content.end_text();
    content.finish()
}

/// Wraps every input line to `max_width` points; blank input lines stay blank.
fn layout(text: &str, max_width: f32) -> Vec<String> {
    let mut output = Vec::new();
    for raw in text.lines() {
        let line = to_latin1(raw.trim_end());
        if line.trim().is_empty() {
            output.push(String::new());
            continue;
        }

        let mut current = String::new();
        for word in line.split(' ').filter(|word| !word.is_empty()) {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if text_width(&candidate) <= max_width {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                output.push(std::mem::take(&mut current));
            }
            for ch in word.chars() {
                current.push(ch);
                if text_width(&current) > max_width && current.chars().count() > 1 {
                    current.pop();
                    output.push(std::mem::replace(&mut current, ch.to_string()));
                }
            }
        }
        output.push(current);
    }
    output
}

fn text_width(text: &str) -> f32 {
    let units: u32 = text.chars().map(|ch| u32::from(char_width(ch))).sum();
    units as f32 * FONT_SIZE / 1000.0
}

fn char_width(ch: char) -> u16 {
    match ch as u32 {
        code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize],
        _ => DEFAULT_WIDTH,
    }
}

/// Keeps Latin-1 characters, turns tabs into spaces and everything else into `?`.
fn to_latin1(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\t' => ' ',
            ch if ch.is_control() => '?',
            ch if (ch as u32) <= 0xFF => ch,
            _ => '?',
        })
        .collect()
}

/// WinAnsi bytes of text already passed through [`to_latin1`].
fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
        .collect()
}
