//! Session context
//!
//! Holds the pages of every ingested file together with their presentation
//! state. Pages stay in ingest order inside the session; the output order
//! lives in each page's `position`, which is rewritten densely (0..n) after
//! every ordering operation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::assemble::{assemble, Assembly, AssemblyMode};
use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::{IngestError, SessionError};
use crate::estimate::{estimate, EstimateStrategy, ProfilePlan, SizeEstimate};
use crate::ingest::ingest;
use crate::page::{Page, PageId, Profile, Rotation, SourceFormat, SourceId};
use crate::preview::{Preview, PreviewCache};

/// Ordering applied by [`Session::sort_by`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Ingest order
    Original,
    /// Source file name, case-insensitive
    Name,
    /// File type, then name
    Kind,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(SortKey::Original),
            "name" => Ok(SortKey::Name),
            "kind" | "type" => Ok(SortKey::Kind),
            other => Err(format!("Unknown sort key: {}", other)),
        }
    }
}

fn kind_label(format: SourceFormat) -> &'static str {
    match format {
        SourceFormat::Pdf => "pdf",
        SourceFormat::Jpeg => "jpeg",
        SourceFormat::Png => "png",
    }
}

pub struct Session {
    engine: Arc<Engine>,
    /// Ingest order
    pages: Vec<Page>,
    global_profile: Profile,
    previews: PreviewCache,
    cancel: CancelToken,
}

impl Session {
    pub fn new(engine: Arc<Engine>) -> Self {
        let previews = PreviewCache::new(engine.config().preview);
        Self {
            engine,
            pages: Vec::new(),
            global_profile: Profile::None,
            previews,
            cancel: CancelToken::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Pages in ingest order
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Pages in output order
    pub fn ordered(&self) -> Vec<&Page> {
        let mut ordered: Vec<&Page> = self.pages.iter().collect();
        ordered.sort_by_key(|p| p.position);
        ordered
    }

    pub fn page(&self, id: PageId) -> Result<&Page, SessionError> {
        self.pages
            .iter()
            .find(|p| p.id() == id)
            .ok_or(SessionError::UnknownPage(id))
    }

    fn page_mut(&mut self, id: PageId) -> Result<&mut Page, SessionError> {
        self.pages
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or(SessionError::UnknownPage(id))
    }

    pub fn preview_cache(&self) -> &PreviewCache {
        &self.previews
    }

    pub fn global_profile(&self) -> Profile {
        self.global_profile
    }

    /// Ingest a file and append its pages after the existing ones
    ///
    /// Returns the ids of the new pages.
    pub fn add_file(
        &mut self,
        name: &str,
        bytes: &[u8],
        declared_kind: &str,
    ) -> Result<Vec<PageId>, SessionError> {
        let source = SourceId::derive(name, bytes);
        if self.pages.iter().any(|p| p.id().source == source) {
            return Err(IngestError::DuplicateSource(name.to_string()).into());
        }

        let mut pages = ingest(name, bytes, declared_kind)?;
        let base = self.pages.len() as u32;
        for (offset, page) in pages.iter_mut().enumerate() {
            page.position = base + offset as u32;
            page.profile = self.global_profile;
        }

        let ids: Vec<PageId> = pages.iter().map(Page::id).collect();
        self.pages.extend(pages);
        info!(name, pages = ids.len(), total = self.pages.len(), "Added file to session");
        Ok(ids)
    }

    /// Remove every page of one source file, returning how many were removed
    pub fn remove_source(&mut self, source: SourceId) -> usize {
        let before = self.pages.len();
        self.pages.retain(|p| p.id().source != source);
        let removed = before - self.pages.len();

        if removed > 0 {
            self.previews.evict_source(source);
            let order: Vec<PageId> = self.ordered().iter().map(|p| p.id()).collect();
            self.apply_order(&order);
            debug!(%source, removed, "Removed source");
        }
        removed
    }

    pub fn set_rotation(&mut self, id: PageId, rotation: Rotation) -> Result<(), SessionError> {
        self.page_mut(id)?.rotation = rotation;
        Ok(())
    }

    /// Turn a page a further 90 degrees clockwise
    pub fn rotate_clockwise(&mut self, id: PageId) -> Result<Rotation, SessionError> {
        let page = self.page_mut(id)?;
        page.rotation = page.rotation.clockwise();
        Ok(page.rotation)
    }

    pub fn set_keep(&mut self, id: PageId, keep: bool) -> Result<(), SessionError> {
        self.page_mut(id)?.keep = keep;
        Ok(())
    }

    /// Change the session profile; pages with their own profile keep it
    pub fn set_global_profile(&mut self, profile: Profile) {
        self.global_profile = profile;
        for page in self.pages.iter_mut().filter(|p| !p.profile_pinned) {
            page.profile = profile;
        }
    }

    /// Pin a profile to one page, or return it to the session profile
    pub fn set_page_profile(
        &mut self,
        id: PageId,
        profile: Option<Profile>,
    ) -> Result<(), SessionError> {
        let global = self.global_profile;
        let page = self.page_mut(id)?;
        match profile {
            Some(profile) => {
                page.profile = profile;
                page.profile_pinned = true;
            }
            None => {
                page.profile = global;
                page.profile_pinned = false;
            }
        }
        Ok(())
    }

    /// Put pages in exactly the given order
    ///
    /// `order` must name every page of the session once.
    pub fn reorder(&mut self, order: &[PageId]) -> Result<(), SessionError> {
        if order.len() != self.pages.len() {
            return Err(SessionError::InvalidOrder(format!(
                "expected {} pages, got {}",
                self.pages.len(),
                order.len()
            )));
        }

        let mut seen = vec![false; self.pages.len()];
        for id in order {
            let idx = self
                .pages
                .iter()
                .position(|p| p.id() == *id)
                .ok_or_else(|| SessionError::InvalidOrder(format!("unknown page {}", id)))?;
            if seen[idx] {
                return Err(SessionError::InvalidOrder(format!("duplicate page {}", id)));
            }
            seen[idx] = true;
        }

        self.apply_order(order);
        Ok(())
    }

    fn apply_order(&mut self, order: &[PageId]) {
        for (position, id) in order.iter().enumerate() {
            if let Some(page) = self.pages.iter_mut().find(|p| p.id() == *id) {
                page.position = position as u32;
            }
        }
    }

    /// Swap a page with the one before it; no-op for the first page
    pub fn move_up(&mut self, id: PageId) -> Result<(), SessionError> {
        self.shift(id, -1)
    }

    /// Swap a page with the one after it; no-op for the last page
    pub fn move_down(&mut self, id: PageId) -> Result<(), SessionError> {
        self.shift(id, 1)
    }

    fn shift(&mut self, id: PageId, delta: isize) -> Result<(), SessionError> {
        let mut order: Vec<PageId> = self.ordered().iter().map(|p| p.id()).collect();
        let from = order
            .iter()
            .position(|&p| p == id)
            .ok_or(SessionError::UnknownPage(id))?;

        let to = from as isize + delta;
        if to >= 0 && (to as usize) < order.len() {
            order.swap(from, to as usize);
        }
        self.apply_order(&order);
        Ok(())
    }

    /// Reorder every page by `key`
    ///
    /// Pages comparing equal keep their ingest order, in both directions.
    pub fn sort_by(&mut self, key: SortKey, reverse: bool) {
        let mut order: Vec<(usize, &Page)> = self.pages.iter().enumerate().collect();
        order.sort_by(|(ia, a), (ib, b)| {
            let ord = match key {
                SortKey::Original => ia.cmp(ib),
                SortKey::Name => a
                    .source_name()
                    .to_lowercase()
                    .cmp(&b.source_name().to_lowercase()),
                SortKey::Kind => (kind_label(a.format()), a.source_name().to_lowercase())
                    .cmp(&(kind_label(b.format()), b.source_name().to_lowercase())),
            };
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });

        let order: Vec<PageId> = order.iter().map(|(_, p)| p.id()).collect();
        self.apply_order(&order);
    }

    /// Thumbnail of a page at its current rotation
    pub fn preview(&self, id: PageId) -> Result<Arc<Preview>, SessionError> {
        let page = self.page(id)?;
        Ok(self
            .previews
            .get_or_render(page, self.engine.rasterizer(), &self.cancel)?)
    }

    pub fn estimate(
        &self,
        plan: ProfilePlan,
        strategy: EstimateStrategy,
    ) -> Result<SizeEstimate, SessionError> {
        Ok(estimate(&self.engine, &self.pages, plan, strategy, &self.cancel)?)
    }

    pub fn assemble(&self, mode: AssemblyMode) -> Result<Assembly, SessionError> {
        Ok(assemble(&self.engine, &self.pages, mode, &self.cancel)?)
    }

    /// Stop in-flight and future renders of this session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token another thread can use to cancel this session
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::RenderError;
    use crate::pdf_image::encode_jpeg;
    use image::{Rgb, RgbImage};

    fn engine() -> Arc<Engine> {
        Arc::new(
            Engine::new(EngineConfig {
                workers: Some(2),
                ..EngineConfig::default()
            })
            .unwrap(),
        )
    }

    fn jpeg(shade: u8) -> Vec<u8> {
        encode_jpeg(&RgbImage::from_pixel(16, 12, Rgb([shade, shade, 0])), 90).unwrap()
    }

    /// Session with one image per name, added in the given order
    fn session_with(names: &[&str]) -> (Session, Vec<PageId>) {
        let mut session = Session::new(engine());
        let mut ids = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let kind = name.rsplit('.').next().unwrap_or("jpg");
            let bytes = if kind == "png" {
                let mut out = Vec::new();
                RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0]))
                    .write_to(
                        &mut std::io::Cursor::new(&mut out),
                        image::ImageFormat::Png,
                    )
                    .unwrap();
                out
            } else {
                jpeg(i as u8 * 20)
            };
            ids.extend(session.add_file(name, &bytes, kind).unwrap());
        }
        (session, ids)
    }

    fn order(session: &Session) -> Vec<PageId> {
        session.ordered().iter().map(|p| p.id()).collect()
    }

    #[test]
    fn test_add_file_appends_positions() {
        let (session, ids) = session_with(&["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(order(&session), ids);
        let positions: Vec<u32> = session.pages().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut session = Session::new(engine());
        let bytes = jpeg(10);
        session.add_file("a.jpg", &bytes, "jpg").unwrap();
        let err = session.add_file("a.jpg", &bytes, "jpg").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Ingest(IngestError::DuplicateSource(_))
        ));
        assert_eq!(session.pages().len(), 1);
    }

    #[test]
    fn test_reorder_requires_permutation() {
        let (mut session, ids) = session_with(&["a.jpg", "b.jpg", "c.jpg"]);

        let short = session.reorder(&ids[..2]);
        assert!(matches!(short, Err(SessionError::InvalidOrder(_))));

        let duplicate = session.reorder(&[ids[0], ids[0], ids[1]]);
        assert!(matches!(duplicate, Err(SessionError::InvalidOrder(_))));

        let reversed: Vec<PageId> = ids.iter().rev().copied().collect();
        session.reorder(&reversed).unwrap();
        assert_eq!(order(&session), reversed);
    }

    #[test]
    fn test_move_up_and_down() {
        let (mut session, ids) = session_with(&["a.jpg", "b.jpg", "c.jpg"]);

        session.move_up(ids[2]).unwrap();
        assert_eq!(order(&session), vec![ids[0], ids[2], ids[1]]);

        session.move_up(ids[0]).unwrap();
        assert_eq!(order(&session), vec![ids[0], ids[2], ids[1]]);

        session.move_down(ids[0]).unwrap();
        assert_eq!(order(&session), vec![ids[2], ids[0], ids[1]]);

        session.move_down(ids[1]).unwrap();
        assert_eq!(order(&session), vec![ids[2], ids[0], ids[1]]);
    }

    #[test]
    fn test_sort_by_name_and_kind() {
        let (mut session, ids) = session_with(&["b.jpg", "C.png", "a.jpg"]);

        session.sort_by(SortKey::Name, false);
        assert_eq!(order(&session), vec![ids[2], ids[0], ids[1]]);

        session.sort_by(SortKey::Kind, false);
        assert_eq!(order(&session), vec![ids[2], ids[0], ids[1]]);

        session.sort_by(SortKey::Kind, true);
        assert_eq!(order(&session), vec![ids[1], ids[0], ids[2]]);

        session.sort_by(SortKey::Original, true);
        assert_eq!(order(&session), vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn test_remove_source_renumbers_densely() {
        let (mut session, ids) = session_with(&["a.jpg", "b.jpg", "c.jpg"]);
        session.preview(ids[1]).unwrap();

        assert_eq!(session.remove_source(ids[1].source), 1);
        assert_eq!(order(&session), vec![ids[0], ids[2]]);
        let positions: Vec<u32> = session.ordered().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert!(session.preview_cache().is_empty());
    }

    #[test]
    fn test_global_profile_skips_pinned_pages() {
        let (mut session, ids) = session_with(&["a.jpg", "b.jpg"]);
        session
            .set_page_profile(ids[0], Some(Profile::Maximum))
            .unwrap();
        session.set_global_profile(Profile::Medium);

        assert_eq!(session.page(ids[0]).unwrap().profile, Profile::Maximum);
        assert_eq!(session.page(ids[1]).unwrap().profile, Profile::Medium);

        session.set_page_profile(ids[0], None).unwrap();
        assert_eq!(session.page(ids[0]).unwrap().profile, Profile::Medium);
    }

    #[test]
    fn test_new_files_take_global_profile() {
        let mut session = Session::new(engine());
        session.set_global_profile(Profile::Minimal);
        let ids = session.add_file("a.jpg", &jpeg(1), "jpg").unwrap();
        assert_eq!(session.page(ids[0]).unwrap().profile, Profile::Minimal);
    }

    #[test]
    fn test_rotate_clockwise_wraps() {
        let (mut session, ids) = session_with(&["a.jpg"]);
        for _ in 0..3 {
            session.rotate_clockwise(ids[0]).unwrap();
        }
        assert_eq!(session.page(ids[0]).unwrap().rotation, Rotation::Cw270);
        assert_eq!(session.rotate_clockwise(ids[0]).unwrap(), Rotation::None);
    }

    #[test]
    fn test_unknown_page() {
        let (mut session, _) = session_with(&["a.jpg"]);
        let stranger = PageId {
            source: SourceId::derive("x", b"y"),
            index: 0,
        };
        assert!(matches!(
            session.set_keep(stranger, false),
            Err(SessionError::UnknownPage(_))
        ));
        assert!(matches!(
            session.move_up(stranger),
            Err(SessionError::UnknownPage(_))
        ));
    }

    #[test]
    fn test_assemble_respects_keep() {
        let (mut session, ids) = session_with(&["a.jpg", "b.jpg", "c.jpg"]);
        session.set_keep(ids[1], false).unwrap();

        let assembly = session.assemble(AssemblyMode::Merge).unwrap();
        let pages: Vec<PageId> = assembly.pages.iter().map(|o| o.page).collect();
        assert_eq!(pages, vec![ids[0], ids[2]]);

        let doc = lopdf::Document::load_mem(&assembly.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_cancel_stops_previews() {
        let (session, ids) = session_with(&["a.jpg"]);
        session.cancel();
        let err = session.preview(ids[0]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Render(RenderError::Cancelled)
        ));
    }
}
