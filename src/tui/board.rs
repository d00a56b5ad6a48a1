//! Kanban board interface.
//!
//! Tasks are laid out in one column per status. Moving a card between
//! columns changes the task's status and saves the board immediately; a
//! failed save is reported in the status bar while the change stays on
//! screen.

use std::io;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};

use crate::board::{BoardError, TaskBoard};
use crate::fields::{SortKey, Status};
use crate::report::{format_due_relative, sort_tasks};
use crate::store::KeyValueStore;
use crate::task::Task;
use crate::tui::colors::{column_color, priority_color, text_on, DARK_RED};

const COLUMN_COUNT: usize = Status::ALL.len();
const CARD_HEIGHT: usize = 5;
const SHORT_ID_CHARS: usize = 8;

/// Main board application state
pub struct BoardApp<'a, S: KeyValueStore> {
    board: &'a mut TaskBoard<S>,
    selected_column: usize,
    selected_card: usize,
    column_scroll_offsets: [usize; COLUMN_COUNT],
    status_message: String,
    show_task_detail: bool,
    filter_active: bool,
    filter_text: String,
    /// Id armed for deletion by a first `x` press.
    pending_delete: Option<String>,
    today: NaiveDate,
    columns: [Vec<String>; COLUMN_COUNT],
}

impl<'a, S: KeyValueStore> BoardApp<'a, S> {
    pub fn new(board: &'a mut TaskBoard<S>) -> Self {
        let status_message = if board.is_durable() {
            String::new()
        } else {
            "Storage unavailable: changes are kept in memory only".to_string()
        };
        let mut app = BoardApp {
            board,
            selected_column: 0,
            selected_card: 0,
            column_scroll_offsets: [0; COLUMN_COUNT],
            status_message,
            show_task_detail: false,
            filter_active: false,
            filter_text: String::new(),
            pending_delete: None,
            today: Local::now().date_naive(),
            columns: Default::default(),
        };
        app.update_columns();
        app
    }

    fn matches_filter(&self, task: &Task) -> bool {
        if self.filter_text.is_empty() {
            return true;
        }
        let needle = self.filter_text.to_lowercase();
        task.title().to_lowercase().contains(&needle)
            || task.tags().iter().any(|tag| tag.to_lowercase().contains(&needle))
            || task
                .description()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
    }

    /// Rebuild the columns from the board, soonest due first.
    fn update_columns(&mut self) {
        let mut grouped: [Vec<&Task>; COLUMN_COUNT] = Default::default();
        for task in self.board.tasks() {
            if self.matches_filter(task) {
                grouped[task.status().column()].push(task);
            }
        }
        let mut columns: [Vec<String>; COLUMN_COUNT] = Default::default();
        for (column, tasks) in columns.iter_mut().zip(grouped.iter_mut()) {
            sort_tasks(tasks, SortKey::Due);
            *column = tasks.iter().map(|t| t.id().to_string()).collect();
        }
        self.columns = columns;
        self.clamp_selection();
    }

    /// Ensure selected column and card indices are valid
    fn clamp_selection(&mut self) {
        if self.selected_column >= COLUMN_COUNT {
            self.selected_column = 0;
        }
        let column_len = self.columns[self.selected_column].len();
        if column_len == 0 {
            self.selected_card = 0;
            self.column_scroll_offsets[self.selected_column] = 0;
        } else if self.selected_card >= column_len {
            self.selected_card = column_len - 1;
        }
    }

    fn selected_task_id(&self) -> Option<String> {
        self.columns[self.selected_column]
            .get(self.selected_card)
            .cloned()
    }

    fn selected_task(&self) -> Option<&Task> {
        let id = self.columns[self.selected_column].get(self.selected_card)?;
        self.board.get(id)
    }

    /// Select `id` wherever it now sits.
    fn focus(&mut self, id: &str) {
        for (column, ids) in self.columns.iter().enumerate() {
            if let Some(card) = ids.iter().position(|c| c == id) {
                self.selected_column = column;
                self.selected_card = card;
                return;
            }
        }
        self.clamp_selection();
    }

    /// Show the outcome of a board change. Returns whether the change is
    /// applied in memory, which is also the case when only the save failed.
    fn report(&mut self, result: Result<String, BoardError>) -> bool {
        match result {
            Ok(message) => {
                self.status_message = message;
                true
            }
            Err(BoardError::Store(err)) => {
                self.status_message = format!("Not saved: {err}");
                true
            }
            Err(err) => {
                self.status_message = format!("Error: {err}");
                false
            }
        }
    }

    fn move_card(&mut self, forward: bool) {
        let Some(id) = self.selected_task_id() else {
            return;
        };
        let target = if forward {
            self.selected_column + 1
        } else {
            match self.selected_column.checked_sub(1) {
                Some(target) => target,
                None => return,
            }
        };
        let Some(status) = Status::from_column(target) else {
            return;
        };
        let result = self
            .board
            .move_to(&id, status)
            .map(|_| format!("Moved task to {}", status.label()));
        if self.report(result) {
            self.update_columns();
            self.focus(&id);
        }
    }

    /// Toggle completion status of the selected task
    fn toggle_task_completion(&mut self) {
        let Some(task) = self.selected_task() else {
            return;
        };
        let id = task.id().to_string();
        let status = if task.status() == Status::Completed {
            Status::Todo
        } else {
            Status::Completed
        };
        let result = self.board.move_to(&id, status).map(|_| match status {
            Status::Completed => "Task marked as completed".to_string(),
            _ => "Task reopened".to_string(),
        });
        if self.report(result) {
            self.update_columns();
        }
    }

    /// First press arms, second press on the same card deletes.
    fn delete_selected(&mut self, armed: Option<String>) {
        let Some(task) = self.selected_task() else {
            return;
        };
        let id = task.id().to_string();
        if armed.as_deref() != Some(id.as_str()) {
            self.status_message = format!("Press x again to delete '{}'", task.title());
            self.pending_delete = Some(id);
            return;
        }
        let result = self
            .board
            .delete(&id)
            .map(|task| format!("Deleted '{}'", task.title()));
        if self.report(result) {
            self.show_task_detail = false;
            self.update_columns();
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.filter_active = false;
                self.filter_text.clear();
                self.status_message.clear();
                self.update_columns();
            }
            KeyCode::Enter => {
                self.filter_active = false;
                self.status_message = if self.filter_text.is_empty() {
                    "Filter cleared".to_string()
                } else {
                    let shown: usize = self.columns.iter().map(Vec::len).sum();
                    format!("Filter: '{}' ({} tasks shown)", self.filter_text, shown)
                };
            }
            KeyCode::Backspace => {
                if self.filter_text.pop().is_some() {
                    self.update_columns();
                }
            }
            KeyCode::Char(c) => {
                self.filter_text.push(c);
                self.update_columns();
            }
            _ => {}
        }
    }

    /// Apply one key press. Returns `true` when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.filter_active {
            self.handle_filter_key(key);
            return false;
        }

        let armed = self.pending_delete.take();
        self.status_message.clear();
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('c') if ctrl => return true,
            KeyCode::Char('q') => return true,
            KeyCode::Esc if self.show_task_detail => self.show_task_detail = false,
            KeyCode::Esc => return true,

            KeyCode::Enter => self.show_task_detail = !self.show_task_detail,

            // Card movement between columns (check first, before regular navigation)
            KeyCode::Left if ctrl => self.move_card(false),
            KeyCode::Right if ctrl => self.move_card(true),
            KeyCode::Char('<') => self.move_card(false),
            KeyCode::Char('>') => self.move_card(true),

            KeyCode::Left => {
                if self.selected_column > 0 {
                    self.selected_column -= 1;
                    self.clamp_selection();
                }
            }
            KeyCode::Right => {
                if self.selected_column + 1 < COLUMN_COUNT {
                    self.selected_column += 1;
                    self.clamp_selection();
                }
            }
            KeyCode::Up => {
                self.selected_card = self.selected_card.saturating_sub(1);
            }
            KeyCode::Down => {
                let column_len = self.columns[self.selected_column].len();
                if self.selected_card + 1 < column_len {
                    self.selected_card += 1;
                }
            }

            KeyCode::Char(' ') => self.toggle_task_completion(),
            KeyCode::Char('x') => self.delete_selected(armed),

            KeyCode::Char('/') => {
                self.filter_active = true;
                self.status_message =
                    "Filter: type to search title/tags/description, Enter to apply, Esc to cancel"
                        .to_string();
            }
            KeyCode::Char('h') => {
                self.status_message = "Help: Enter: Details | </>: Move | Space: Complete | x: Delete | /: Filter | q: Quit".to_string();
            }
            _ => {}
        }
        false
    }

    /// Handle keyboard input
    fn handle_input(&mut self) -> io::Result<bool> {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(self.handle_key(key));
                }
            }
        }
        Ok(false)
    }

    /// Render the kanban board
    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Board
                Constraint::Length(1), // Status bar
            ])
            .split(f.area());

        self.render_header(f, chunks[0]);
        self.render_board(f, chunks[1]);
        self.render_status_bar(f, chunks[2]);

        if self.show_task_detail {
            self.render_task_detail_popup(f);
        }
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let overdue = self
            .board
            .tasks()
            .iter()
            .filter(|t| t.is_overdue_on(self.today))
            .count();
        let mode = if self.board.is_durable() {
            "saved"
        } else {
            "memory only"
        };
        let header_text = vec![Line::from(vec![
            Span::styled("TASK BOARD", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(
                format!(
                    "{} tasks  {} overdue  [{}]",
                    self.board.tasks().len(),
                    overdue,
                    mode
                ),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC),
            ),
        ])];

        let header_block = Paragraph::new(header_text)
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        f.render_widget(header_block, area);
    }

    fn render_board(&mut self, f: &mut Frame, area: Rect) {
        let constraints = [Constraint::Ratio(1, COLUMN_COUNT as u32); COLUMN_COUNT];
        let columns_layout = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area);

        for (i, &column_area) in columns_layout.iter().enumerate() {
            self.render_column(f, column_area, i);
        }
    }

    fn render_column(&mut self, f: &mut Frame, area: Rect, column_index: usize) {
        let status = Status::ALL[column_index];
        let is_selected = column_index == self.selected_column;
        let accent = column_color(status);

        let border_style = if is_selected {
            Style::default().fg(accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        let title = format!("{} ({})", status.label(), self.columns[column_index].len());
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style);

        let inner = block.inner(area);
        f.render_widget(block, area);

        if self.columns[column_index].is_empty() {
            return;
        }

        let available_height = inner.height as usize;
        let visible_cards = available_height / CARD_HEIGHT;

        // Keep the selected card inside the visible window.
        let scroll_offset = if is_selected {
            let start_visible = self.column_scroll_offsets[column_index];
            let end_visible = start_visible + visible_cards;
            if self.selected_card < start_visible {
                self.selected_card
            } else if self.selected_card >= end_visible && visible_cards > 0 {
                self.selected_card + 1 - visible_cards
            } else {
                start_visible
            }
        } else {
            self.column_scroll_offsets[column_index]
        };
        self.column_scroll_offsets[column_index] = scroll_offset;

        let cards = &self.columns[column_index];
        let mut current_y = 0;
        let mut rendered_cards = 0;
        for (card_index, task_id) in cards.iter().enumerate().skip(scroll_offset) {
            if current_y + CARD_HEIGHT > available_height {
                break;
            }
            let Some(task) = self.board.get(task_id) else {
                continue;
            };
            let card_area = Rect {
                x: inner.x,
                y: inner.y + current_y as u16,
                width: inner.width,
                height: CARD_HEIGHT as u16,
            };
            let is_this_card_selected = is_selected && card_index == self.selected_card;
            self.render_card(f, card_area, task, accent, is_this_card_selected);
            current_y += CARD_HEIGHT;
            rendered_cards += 1;
        }

        if scroll_offset > 0 {
            let indicator = Paragraph::new(format!("▲ +{scroll_offset} above"))
                .style(Style::default().fg(Color::Cyan));
            f.render_widget(indicator, Rect { height: 1, ..inner });
        }
        let remaining = cards.len().saturating_sub(scroll_offset + rendered_cards);
        if remaining > 0 {
            let indicator = Paragraph::new(format!("▼ +{remaining} below"))
                .style(Style::default().fg(Color::Cyan));
            f.render_widget(
                indicator,
                Rect {
                    y: inner.y + inner.height.saturating_sub(1),
                    height: 1,
                    ..inner
                },
            );
        }
    }

    fn render_card(&self, f: &mut Frame, area: Rect, task: &Task, accent: Color, is_selected: bool) {
        let overdue = task.is_overdue_on(self.today);
        let style = if is_selected {
            Style::default()
                .bg(accent)
                .fg(text_on(accent))
                .add_modifier(Modifier::BOLD)
        } else if overdue {
            Style::default().bg(DARK_RED).fg(Color::White)
        } else {
            Style::default().bg(Color::DarkGray)
        };

        let short_id: String = task.id().chars().take(SHORT_ID_CHARS).collect();
        let mut card_text = vec![Line::from(vec![
            Span::raw(format!("#{short_id} ")),
            Span::styled(
                task.priority().label(),
                Style::default().fg(priority_color(task.priority())),
            ),
        ])];

        // Simple word wrapping, at most two lines of title.
        let available_width = area.width.saturating_sub(2) as usize;
        let mut current_line = String::new();
        let mut lines = Vec::new();
        for word in task.title().split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + 1 + word.chars().count() <= available_width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(std::mem::replace(&mut current_line, word.to_string()));
                if lines.len() >= 2 {
                    break;
                }
            }
        }
        if !current_line.is_empty() && lines.len() < 2 {
            lines.push(current_line);
        }
        card_text.extend(lines.into_iter().map(Line::from));

        let progress = task.subtask_progress();
        let mut footer = format_due_relative(task.due_day(), self.today);
        if overdue {
            footer.push_str(" OVERDUE");
        }
        if progress.total > 0 {
            footer.push_str(&format!(" | {}/{}", progress.completed, progress.total));
        }
        if !task.tags().is_empty() {
            footer.push_str(&format!(" | #{}", task.tags().join(" #")));
        }
        card_text.push(Line::from(footer));

        let card_block = Paragraph::new(card_text)
            .block(Block::default().borders(Borders::ALL))
            .style(style)
            .wrap(Wrap { trim: true });
        f.render_widget(card_block, area);
    }

    fn render_status_bar(&self, f: &mut Frame, area: Rect) {
        let status_text = if self.filter_active {
            format!(
                "Filter: {} | Type to search, Enter to apply, Esc to cancel",
                self.filter_text
            )
        } else if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            let shown: usize = self.columns.iter().map(Vec::len).sum();
            let filter_indicator = if self.filter_text.is_empty() {
                String::new()
            } else {
                format!(" [Filter: {}]", self.filter_text)
            };
            format!(
                "Tasks: {shown}{filter_indicator} | </>: Move | Space: Complete | x: Delete | /: Filter | h: Help"
            )
        };

        let accent = column_color(Status::ALL[self.selected_column]);
        let status = Paragraph::new(status_text)
            .style(Style::default().bg(accent).fg(text_on(accent)))
            .alignment(Alignment::Left);
        f.render_widget(status, area);
    }

    fn render_task_detail_popup(&self, f: &mut Frame) {
        let Some(task) = self.selected_task() else {
            return;
        };

        let popup_area = {
            let area = f.area();
            let popup_width = (area.width * 80) / 100;
            let popup_height = (area.height * 80) / 100;
            let x = (area.width - popup_width) / 2;
            let y = (area.height - popup_height) / 2;
            Rect::new(x, y, popup_width, popup_height)
        };
        f.render_widget(Clear, popup_area);

        let due_str = match task.due_day() {
            Some(day) => format!(
                "{} ({}){}",
                day,
                format_due_relative(Some(day), self.today),
                if task.is_overdue_on(self.today) { " OVERDUE" } else { "" }
            ),
            None => "-".to_string(),
        };
        let progress = task.subtask_progress();

        let mut detail_lines = vec![
            Line::from(vec![Span::styled(
                task.title().to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            Line::from(format!("ID:        {}", task.id())),
            Line::from(format!("Status:    {}", task.status().label())),
            Line::from(format!("Priority:  {}", task.priority().label())),
            Line::from(format!("Due:       {due_str}")),
            Line::from(format!(
                "Tags:      {}",
                if task.tags().is_empty() {
                    "-".to_string()
                } else {
                    task.tags().join(", ")
                }
            )),
            Line::from(format!(
                "Created:   {}",
                task.created_at().with_timezone(&Local).format("%Y-%m-%d %H:%M")
            )),
            Line::from(format!(
                "Updated:   {}",
                task.updated_at().with_timezone(&Local).format("%Y-%m-%d %H:%M")
            )),
            Line::from(""),
            Line::from("Description:"),
            Line::from(task.description().unwrap_or("-").to_string()),
        ];

        if progress.total > 0 {
            detail_lines.push(Line::from(""));
            detail_lines.push(Line::from(format!(
                "Subtasks: {}/{} ({}%)",
                progress.completed, progress.total, progress.percentage
            )));
            for subtask in task.subtasks() {
                let mark = if subtask.is_completed() { "x" } else { " " };
                detail_lines.push(Line::from(format!("  [{mark}] {}", subtask.title())));
            }
        }

        let popup_block = Block::default()
            .borders(Borders::ALL)
            .title("Task Details (Enter to close)")
            .title_alignment(Alignment::Center)
            .border_style(
                Style::default()
                    .fg(column_color(task.status()))
                    .add_modifier(Modifier::BOLD),
            );
        let popup_paragraph = Paragraph::new(detail_lines)
            .block(popup_block)
            .wrap(Wrap { trim: true })
            .style(Style::default().bg(Color::Black));
        f.render_widget(popup_paragraph, popup_area);
    }

    /// Main event loop
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.render(f))?;
            if self.handle_input()? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TaskStore};
    use crate::task::TaskInput;
    use ratatui::backend::TestBackend;

    fn press(app: &mut BoardApp<'_, MemoryStore>, code: KeyCode) -> bool {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn screen(terminal: &mut Terminal<TestBackend>, app: &mut BoardApp<'_, MemoryStore>) -> String {
        terminal.draw(|f| app.render(f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    fn board_with(titles: &[&str]) -> TaskBoard<MemoryStore> {
        let mut board = TaskBoard::open(TaskStore::new(MemoryStore::new())).unwrap();
        for title in titles {
            board.add(TaskInput::new(*title)).unwrap();
        }
        board
    }

    #[test]
    fn cards_move_between_columns_and_are_saved() {
        let mut board = board_with(&["write tests"]);
        {
            let mut app = BoardApp::new(&mut board);
            press(&mut app, KeyCode::Char('>'));
            assert_eq!(app.selected_column, Status::InProgress.column());
            app.handle_key(KeyEvent::new(KeyCode::Right, KeyModifiers::CONTROL));
            assert_eq!(app.selected_column, Status::Completed.column());
            // Already in the last column.
            press(&mut app, KeyCode::Char('>'));
            assert_eq!(app.selected_column, Status::Completed.column());
            press(&mut app, KeyCode::Char('<'));
            assert_eq!(app.status_message, "Moved task to In Progress");
        }
        assert_eq!(board.tasks()[0].status(), Status::InProgress);

        let kv = board.store().unwrap().backend().clone();
        let reloaded = TaskStore::new(kv).load_tasks().unwrap();
        assert_eq!(reloaded[0].status(), Status::InProgress);
    }

    #[test]
    fn space_toggles_completion() {
        let mut board = board_with(&["one"]);
        {
            let mut app = BoardApp::new(&mut board);
            press(&mut app, KeyCode::Char(' '));
            assert_eq!(app.columns[Status::Completed.column()].len(), 1);
        }
        assert_eq!(board.tasks()[0].status(), Status::Completed);
    }

    #[test]
    fn delete_needs_confirmation() {
        let mut board = board_with(&["keep", "drop"]);
        {
            let mut app = BoardApp::new(&mut board);
            press(&mut app, KeyCode::Char('x'));
            press(&mut app, KeyCode::Down);
            // Moving away disarms.
            press(&mut app, KeyCode::Char('x'));
            assert!(app.status_message.starts_with("Press x again"));
            press(&mut app, KeyCode::Char('x'));
            assert_eq!(app.columns[0].len(), 1);
        }
        assert_eq!(board.tasks().len(), 1);
    }

    #[test]
    fn filter_narrows_columns() {
        let mut board = board_with(&["buy milk", "file taxes", "buy stamps"]);
        let mut app = BoardApp::new(&mut board);
        press(&mut app, KeyCode::Char('/'));
        for c in "buy".chars() {
            press(&mut app, KeyCode::Char(c));
        }
        assert_eq!(app.columns[0].len(), 2);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.status_message, "Filter: 'buy' (2 tasks shown)");
        // Typing after the filter is applied drives the board again.
        assert!(press(&mut app, KeyCode::Char('q')));
    }

    #[test]
    fn escape_closes_details_before_quitting() {
        let mut board = board_with(&["one"]);
        let mut app = BoardApp::new(&mut board);
        press(&mut app, KeyCode::Enter);
        assert!(app.show_task_detail);
        assert!(!press(&mut app, KeyCode::Esc));
        assert!(!app.show_task_detail);
        assert!(press(&mut app, KeyCode::Esc));
    }

    #[test]
    fn renders_columns_and_details() {
        let mut board = board_with(&["Render me"]);
        let id = board.tasks()[0].id().to_string();
        board.add_subtask(&id, "step").unwrap();
        let mut app = BoardApp::new(&mut board);
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();

        let board_view = screen(&mut terminal, &mut app);
        for text in ["To Do (1)", "In Progress (0)", "Completed (0)", "Render me"] {
            assert!(board_view.contains(text), "missing {text:?}");
        }

        press(&mut app, KeyCode::Enter);
        assert!(screen(&mut terminal, &mut app).contains("Subtasks: 0/1 (0%)"));
    }
}
