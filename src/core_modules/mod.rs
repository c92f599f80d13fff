pub mod chroma_filter;
pub mod convex_hull;
pub mod effects;
pub mod object;
pub mod object_map;
pub mod pixel;
pub mod post_processor;
pub mod ring_buffer;
pub mod tracker;

pub mod utils {
    pub mod image_helper;
}
