//! Frame rendering. Everything here reads [`App`] and never mutates it.

use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use tetra_core::grid::{ColumnSlot, DataGrid, EditMode};
use tetra_core::panes::{PaneKind, PaneState};
use tetra_core::text_input::TextInput;
use tetra_core::tree::{CatalogTree, NodeKind};

use crate::app::{App, Mode};
use crate::forms::{ConnectionPicker, FormField};

const HEADER_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
/// Border plus column header plus separator rule.
const GRID_CHROME_ROWS: usize = 4;
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

/// Rows and columns available to each scrolling widget for a terminal size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewports {
    pub pane_rows: usize,
    pub grid_rows: usize,
    pub grid_width: usize,
    pub tree_rows: usize,
}

impl Viewports {
    #[must_use]
    pub fn for_area(area: Rect) -> Self {
        let body = area.height.saturating_sub(HEADER_HEIGHT + FOOTER_HEIGHT);
        let (top, bottom) = split_body(body);
        Self {
            pane_rows: usize::from(top).saturating_sub(2).max(1),
            grid_rows: usize::from(bottom).saturating_sub(GRID_CHROME_ROWS).max(1),
            grid_width: usize::from(area.width).saturating_sub(4).max(1),
            tree_rows: usize::from(body).saturating_sub(2).max(1),
        }
    }
}

fn split_body(height: u16) -> (u16, u16) {
    let top = height / 2;
    (top, height - top)
}

pub fn render(frame: &mut Frame<'_>, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(0),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    match app.mode() {
        Mode::Picker => render_picker(frame, app, chunks[1]),
        Mode::Form => render_form(frame, app, chunks[1]),
        Mode::Connecting => render_connecting(frame, app, chunks[1]),
        Mode::Panes => render_panes(frame, app, chunks[1]),
        Mode::Tree => render_tree(frame, app, chunks[1]),
        Mode::Query => render_query(frame, app, chunks[1]),
    }
    render_footer(frame, app, chunks[2]);

    if app.mode() == Mode::Panes {
        if let Some(session) = app.grid().edit() {
            render_edit_popup(frame, app.grid(), &session.input, session.mode);
        }
    }
    if let Some(overlay) = app.overlay() {
        let area = centered_rect(60, 30, frame.area());
        frame.render_widget(Clear, area);
        let body = Paragraph::new(vec![
            Line::from(overlay.message.as_str()),
            Line::from(""),
            Line::from(Span::styled(
                "Enter or Esc to dismiss",
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(overlay.title.as_str()),
        );
        frame.render_widget(body, area);
    }
}

fn render_header(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let mut spans = Vec::new();
    match app.session() {
        Some(session) => {
            spans.push(Span::styled(
                format!(" {} ", session.info().name),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::raw(format!(
                "| {} | {} ms",
                session.info().driver.label(),
                session.ping().as_millis()
            )));
        }
        None => spans.push(Span::raw(" not connected")),
    }

    if matches!(app.mode(), Mode::Panes | Mode::Tree | Mode::Query) {
        let context = match app.grid().context() {
            Some(target) => target.to_string(),
            None if !app.grid().is_empty() => "query results".to_string(),
            None => "-".to_string(),
        };
        spans.push(Span::raw(format!(" | Data: {context}")));
    }

    if let Some(busy) = app.busy() {
        let frame_index = app.ticks() % SPINNER.len();
        spans.push(Span::styled(
            format!(" | {} {busy}", SPINNER[frame_index]),
            Style::default().fg(Color::Cyan),
        ));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("tetra"));
    frame.render_widget(header, area);
}

fn render_footer(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let footer = Paragraph::new(vec![
        Line::from(key_help(app)),
        Line::from(Span::styled(
            app.status().to_string(),
            Style::default().fg(Color::Gray),
        )),
    ])
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, area);
}

fn key_help(app: &App) -> &'static str {
    match app.mode() {
        Mode::Picker => "Up/Down choose  Enter connect  Ctrl+N new  Esc quit",
        Mode::Form => "Tab next field  Space switches driver  Enter save and connect  Esc back",
        Mode::Connecting => "Esc cancel  Ctrl+X quit",
        Mode::Panes if app.grid().is_editing() => "Enter commit  Esc cancel",
        Mode::Panes if app.panes().focus() == PaneKind::Data => {
            "Enter edit  Ctrl+N insert  Ctrl+D delete  Ctrl+R reload  Esc tables  Ctrl+Q query"
        }
        Mode::Panes => {
            "Left/Right drill  Enter open  Tab cycle  F5 refresh  F2 tree  Ctrl+Q query  Esc back"
        }
        Mode::Tree if app.tree_nav().is_searching() => "Enter next match  Esc end search",
        Mode::Tree => "Right expand  Left collapse  Ctrl+D view table  / search  F2 panes  Esc panes",
        Mode::Query => "Enter run  Ctrl+J new line  Esc close",
    }
}

fn render_picker(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let selected = app.picker().selected();
    let lines: Vec<Line<'_>> = ConnectionPicker::entries(app.store())
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            if index == selected {
                Line::from(Span::styled(format!("> {entry}"), highlight()))
            } else {
                Line::from(format!("  {entry}"))
            }
        })
        .collect();
    let picker = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Connections ({})", app.store().path().display())),
    );
    frame.render_widget(picker, area);
}

fn render_form(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let form = app.form();
    let label_width = form
        .fields()
        .iter()
        .map(|field| field.label().len())
        .max()
        .unwrap_or(0);

    let mut lines = Vec::new();
    let mut cursor = None;
    for (row, field) in form.fields().iter().enumerate() {
        let focused = *field == form.focus();
        let value = if *field == FormField::Driver {
            format!("< {} >", form.driver().label())
        } else {
            form.display_value(*field)
        };
        let text = format!(
            "{} {:<label_width$} : {value}",
            if focused { ">" } else { " " },
            field.label()
        );
        if focused {
            if let Some(input) = form.input(*field) {
                cursor = Some((row, label_width + 5 + input.cursor()));
            }
            lines.push(Line::from(Span::styled(text, highlight())));
        } else {
            lines.push(Line::from(text));
        }
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .title("New connection");
    let inner = block.inner(area);
    frame.render_widget(Paragraph::new(lines).block(block), area);
    if let Some((row, column)) = cursor {
        place_cursor(frame, inner, row, column);
    }
}

fn render_connecting(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let message = app.busy().unwrap_or("Connecting");
    let body = Paragraph::new(vec![
        Line::from(""),
        Line::from(format!(
            "{} {message}",
            SPINNER[app.ticks() % SPINNER.len()]
        )),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(body, area);
}

fn render_panes(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let (top, _) = split_body(area.height);
    let halves = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(top), Constraint::Min(0)])
        .split(area);
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 3); 3])
        .split(halves[0]);

    let focus = app.panes().focus();
    let structural = [PaneKind::Databases, PaneKind::Schemas, PaneKind::Tables];
    for (kind, column) in structural.into_iter().zip(columns.iter()) {
        render_list_pane(frame, app, app.panes().pane(kind), focus == kind, *column);
    }
    render_grid(frame, app.grid(), focus == PaneKind::Data, halves[1]);
}

fn render_list_pane(
    frame: &mut Frame<'_>,
    app: &App,
    pane: &PaneState,
    focused: bool,
    area: Rect,
) {
    let lines: Vec<Line<'_>> = match app.tree() {
        Some(tree) => pane
            .visible_window()
            .iter()
            .enumerate()
            .map(|(row, node)| {
                let label = tree.node(*node).display_label();
                if pane.offset() + row == pane.selected_index() {
                    let style = if focused {
                        highlight()
                    } else {
                        Style::default().add_modifier(Modifier::BOLD)
                    };
                    Line::from(Span::styled(format!("> {label}"), style))
                } else {
                    Line::from(format!("  {label}"))
                }
            })
            .collect(),
        None => Vec::new(),
    };

    let widget = Paragraph::new(lines).block(pane_block(pane.kind().title(), focused));
    frame.render_widget(widget, area);
}

fn render_grid(frame: &mut Frame<'_>, grid: &DataGrid, focused: bool, area: Rect) {
    let title = match grid.context() {
        Some(target) => format!("{} - {target}", PaneKind::Data.title()),
        None => PaneKind::Data.title().to_string(),
    };
    let mut block = pane_block(&title, focused);

    if grid.is_empty() {
        let message = if grid.columns().is_empty() {
            "No data"
        } else {
            "No rows"
        };
        let widget = Paragraph::new(Line::from(message)).block(block);
        frame.render_widget(widget, area);
        return;
    }

    let slots = grid.visible_columns();
    let rows = grid.visible_rows();
    let selection = grid.selection();
    block = block.title_bottom(Line::from(format!(
        " rows {}-{} of {} | cols {}-{} of {} ",
        rows.start + 1,
        rows.end,
        grid.row_count(),
        slots.first().map_or(0, |slot| slot.index + 1),
        slots.last().map_or(0, |slot| slot.index + 1),
        grid.columns().len()
    )));

    let header: Vec<Span<'_>> = slots
        .iter()
        .map(|slot| {
            Span::styled(
                format!("{} ", fit(&grid.columns()[slot.index], slot.width)),
                Style::default().add_modifier(Modifier::BOLD),
            )
        })
        .collect();
    let rule_width: usize = slots.iter().map(|slot| slot.width + 1).sum();

    let mut lines = vec![Line::from(header), Line::from("-".repeat(rule_width))];
    for row in rows {
        let cells: Vec<Span<'_>> = slots
            .iter()
            .map(|slot| {
                let text = format!("{} ", cell_text(grid, row, *slot));
                if row == selection.row && slot.index == selection.column {
                    let style = if focused {
                        highlight()
                    } else {
                        Style::default().add_modifier(Modifier::UNDERLINED)
                    };
                    Span::styled(text, style)
                } else {
                    Span::raw(text)
                }
            })
            .collect();
        lines.push(Line::from(cells));
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn cell_text(grid: &DataGrid, row: usize, slot: ColumnSlot) -> String {
    let text = grid
        .cell(row, slot.index)
        .map(ToString::to_string)
        .unwrap_or_default();
    fit(&text, slot.width)
}

fn render_edit_popup(frame: &mut Frame<'_>, grid: &DataGrid, input: &TextInput, mode: EditMode) {
    let title = match (mode, grid.selected_column(), grid.context()) {
        (EditMode::UpdateCell, Some(column), Some(target)) => {
            format!("Edit {}.{column}", target.table)
        }
        (EditMode::InsertRow, _, Some(target)) => format!("Insert into {}", target.table),
        _ => "Edit".to_string(),
    };
    let area = centered_rect(60, 20, frame.area());
    frame.render_widget(Clear, area);

    let line = if input.is_empty() {
        Line::from(Span::styled(
            input.placeholder().to_string(),
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Line::from(input.value())
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(title);
    let inner = block.inner(area);
    frame.render_widget(Paragraph::new(line).block(block), area);
    place_cursor(frame, inner, 0, input.cursor());
}

fn render_tree(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let nav = app.tree_nav();
    let title = match nav.search_query() {
        Some(query) => format!("Catalog  /{query}"),
        None => "Catalog".to_string(),
    };

    let lines = match app.tree() {
        Some(tree) => tree_lines(tree, nav.offset(), nav.height()),
        None => Vec::new(),
    };
    let widget = Paragraph::new(lines).block(pane_block(&title, true));
    frame.render_widget(widget, area);
}

fn tree_lines(tree: &CatalogTree, offset: usize, height: usize) -> Vec<Line<'static>> {
    let selected = tree.selected();
    tree.all_visible_nodes()
        .into_iter()
        .skip(offset)
        .take(height)
        .map(|id| {
            let node = tree.node(id);
            let marker = match node.kind {
                NodeKind::Column => " ",
                _ if node.expanded => "v",
                _ => ">",
            };
            let text = format!(
                "{}{marker} {}",
                "  ".repeat(usize::try_from(node.level.saturating_sub(1)).unwrap_or(0)),
                node.display_label()
            );
            if Some(id) == selected {
                Line::from(Span::styled(text, highlight()))
            } else {
                Line::from(text)
            }
        })
        .collect()
}

fn render_query(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let query = app.query();
    let lines: Vec<Line<'_>> = if query.is_empty() {
        vec![Line::from(Span::styled(
            query.placeholder().to_string(),
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        query
            .value()
            .split('\n')
            .map(|line| Line::from(line.to_string()))
            .collect()
    };

    let block = pane_block("Query", true);
    let inner = block.inner(area);
    frame.render_widget(Paragraph::new(lines).block(block), area);
    let (line, column) = query.cursor_position();
    place_cursor(frame, inner, line, column);
}

fn pane_block(title: &str, focused: bool) -> Block<'static> {
    let border = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(title.to_string())
}

fn highlight() -> Style {
    Style::default()
        .fg(Color::Black)
        .bg(Color::Yellow)
        .add_modifier(Modifier::BOLD)
}

fn place_cursor(frame: &mut Frame<'_>, inner: Rect, row: usize, column: usize) {
    let x = u16::try_from(column)
        .unwrap_or(u16::MAX)
        .min(inner.width.saturating_sub(1));
    let y = u16::try_from(row)
        .unwrap_or(u16::MAX)
        .min(inner.height.saturating_sub(1));
    frame.set_cursor_position((inner.x + x, inner.y + y));
}

/// Pads or truncates `text` to exactly `width` characters.
fn fit(text: &str, width: usize) -> String {
    let length = text.chars().count();
    if length <= width {
        return format!("{text:<width$}");
    }
    if width == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(width - 1).collect();
    truncated.push('~');
    truncated
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use ratatui::backend::TestBackend;
    use ratatui::buffer::Buffer;
    use ratatui::layout::Rect;
    use ratatui::Terminal;
    use tempfile::TempDir;
    use tetra_core::connections::ConnectionStore;
    use tetra_core::settings::Settings;

    use super::{fit, render, Viewports};
    use crate::app::App;

    fn screen(buffer: &Buffer) -> String {
        let width = usize::from(buffer.area.width);
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn viewports_split_body_between_panes_and_grid() {
        let viewports = Viewports::for_area(Rect::new(0, 0, 120, 40));
        assert_eq!(
            viewports,
            Viewports {
                pane_rows: 15,
                grid_rows: 13,
                grid_width: 116,
                tree_rows: 32,
            }
        );
    }

    #[test]
    fn tiny_terminals_keep_one_row() {
        let viewports = Viewports::for_area(Rect::new(0, 0, 3, 4));
        assert_eq!(viewports.pane_rows, 1);
        assert_eq!(viewports.grid_rows, 1);
        assert_eq!(viewports.grid_width, 1);
    }

    #[test]
    fn fit_pads_and_truncates() {
        assert_eq!(fit("id", 4), "id  ");
        assert_eq!(fit("username", 5), "user~");
        assert_eq!(fit("abc", 0), "");
    }

    #[test]
    fn picker_lists_new_entry_and_saved_connections() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = ConnectionStore::load_from_path(temp_dir.path().join("connections.json"))
            .expect("store should load");
        let app = App::new(store, Settings::default());

        let mut terminal =
            Terminal::new(TestBackend::new(80, 20)).expect("test terminal should build");
        terminal
            .draw(|frame| render(frame, &app))
            .expect("draw should succeed");

        let text = screen(terminal.backend().buffer());
        assert!(text.contains("+ New connection"));
        assert!(text.contains("local"));
        assert!(text.contains("not connected"));
    }
}
